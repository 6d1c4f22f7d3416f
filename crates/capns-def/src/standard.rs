use capns_urn::{CapUrn, MediaUrn};

use crate::cap::{ArgSource, Cap, CapArg, CapBuilder};

/// The categorical identity morphism. Mandatory in every manifest: it
/// accepts any media type and outputs the same bytes unchanged.
pub const IDENTITY_CAP_URN: &str = "cap:in=media:;out=media:";

/// The terminal morphism: accepts any media type and produces void.
/// Standard but optional.
pub const DISCARD_CAP_URN: &str = "cap:in=media:;out=media:void";

/// Build the standard identity cap definition.
#[must_use]
pub fn identity_cap() -> Cap {
    let urn = CapUrn::parse(IDENTITY_CAP_URN).expect("identity URN is valid");
    CapBuilder::new(urn, "Identity", "identity")
        .description("Pass input through unchanged")
        .arg(CapArg {
            name: "input".to_string(),
            media_urn: MediaUrn::any(),
            required: true,
            sources: vec![ArgSource::Stdin {
                media_urn: MediaUrn::any(),
            }],
            description: None,
            default: None,
            validation: None,
        })
        .output(MediaUrn::any(), Some("The input, unchanged".to_string()))
        .build()
        .expect("identity cap definition is valid")
}

/// Build the standard discard cap definition.
#[must_use]
pub fn discard_cap() -> Cap {
    let urn = CapUrn::parse(DISCARD_CAP_URN).expect("discard URN is valid");
    CapBuilder::new(urn, "Discard", "discard")
        .description("Consume input and produce nothing")
        .arg(CapArg {
            name: "input".to_string(),
            media_urn: MediaUrn::any(),
            required: true,
            sources: vec![ArgSource::Stdin {
                media_urn: MediaUrn::any(),
            }],
            description: None,
            default: None,
            validation: None,
        })
        .output(
            MediaUrn::parse("media:void").expect("void URN is valid"),
            None,
        )
        .build()
        .expect("discard cap definition is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_cap_urn_round_trips() {
        let cap = identity_cap();
        assert_eq!(cap.urn_string(), IDENTITY_CAP_URN);
    }

    #[test]
    fn test_discard_cap_outputs_void() {
        let cap = discard_cap();
        assert!(cap.output.as_ref().unwrap().media_urn.is_void());
        assert_eq!(cap.urn_string(), DISCARD_CAP_URN);
    }

    #[test]
    fn test_identity_accepts_any_direction() {
        let cap = identity_cap();
        let request = CapUrn::parse(r#"cap:in="media:pdf";out=media:"#).unwrap();
        assert!(cap.accepts(&request));
    }
}
