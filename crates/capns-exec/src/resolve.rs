use std::collections::BTreeMap;

use serde_json::Value;

use capns_plan::{ArgumentBinding, ArgumentSource, CapInputFile, NodeId, ResolvedArgument};

use crate::error::ExecError;

/// Everything a binding may draw from at resolution time.
///
/// `previous_outputs` holds raw node outputs, already edge-transformed
/// for this consumer where a transforming edge exists.
pub struct ArgumentResolutionContext<'a> {
    pub input_files: &'a [CapInputFile],
    /// Index of the file currently flowing through (varies inside a
    /// fan-out iteration).
    pub current_file_index: usize,
    pub previous_outputs: &'a BTreeMap<NodeId, Vec<u8>>,
    pub plan_metadata: Option<&'a Value>,
    /// Settings for the cap being resolved, keyed by argument media URN.
    pub cap_settings: Option<&'a BTreeMap<String, Value>>,
    pub slot_values: Option<&'a BTreeMap<String, Vec<u8>>>,
}

impl<'a> ArgumentResolutionContext<'a> {
    #[must_use]
    pub fn current_file(&self) -> Option<&CapInputFile> {
        self.input_files.get(self.current_file_index)
    }
}

/// Encode a JSON value as argument bytes: strings pass through as their
/// UTF-8 content, everything else as canonical JSON.
#[must_use]
pub fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        other => serde_json::to_vec(other).expect("JSON value serializes"),
    }
}

/// Resolve one binding to raw bytes.
///
/// Deterministic, and side-effect free apart from one disk read per
/// `InputFile` binding.
pub fn resolve_binding(
    binding: &ArgumentBinding,
    context: &ArgumentResolutionContext<'_>,
    cap_urn: &str,
    arg_name: &str,
    default: Option<&Value>,
    is_required: bool,
) -> Result<ResolvedArgument, ExecError> {
    let required_missing = || ExecError::RequiredMissing {
        cap_urn: cap_urn.to_string(),
        arg: arg_name.to_string(),
    };

    match binding {
        ArgumentBinding::InputFile { index } => {
            let file = context.input_files.get(*index).ok_or_else(|| {
                ExecError::InputFileOutOfRange {
                    index: *index,
                    count: context.input_files.len(),
                }
            })?;
            let bytes = std::fs::read(&file.file_path).map_err(|source| ExecError::Io {
                path: file.file_path.display().to_string(),
                source,
            })?;
            Ok(ResolvedArgument::new(arg_name, bytes, ArgumentSource::InputFile))
        }
        ArgumentBinding::InputFilePath => {
            let file = context.current_file().ok_or_else(required_missing)?;
            Ok(ResolvedArgument::new(
                arg_name,
                file.file_path.display().to_string().into_bytes(),
                ArgumentSource::InputFile,
            ))
        }
        ArgumentBinding::InputMediaUrn => {
            let file = context.current_file().ok_or_else(required_missing)?;
            Ok(ResolvedArgument::new(
                arg_name,
                file.media_urn.to_string().into_bytes(),
                ArgumentSource::InputFile,
            ))
        }
        ArgumentBinding::PreviousOutput { node, field } => {
            let raw = context
                .previous_outputs
                .get(node)
                .ok_or_else(required_missing)?;
            let bytes = match field {
                None => raw.clone(),
                Some(field) => {
                    let json: Value =
                        serde_json::from_slice(raw).map_err(|e| ExecError::NotJson {
                            node: node.clone(),
                            reason: e.to_string(),
                        })?;
                    let value = json.get(field).ok_or_else(|| ExecError::FieldMissing {
                        field: field.clone(),
                    })?;
                    encode_value(value)
                }
            };
            Ok(ResolvedArgument::new(
                arg_name,
                bytes,
                ArgumentSource::PreviousOutput,
            ))
        }
        ArgumentBinding::CapDefault => match default {
            Some(value) => Ok(ResolvedArgument::new(
                arg_name,
                encode_value(value),
                ArgumentSource::CapDefault,
            )),
            None if is_required => Err(required_missing()),
            None => Ok(ResolvedArgument::new(
                arg_name,
                Vec::new(),
                ArgumentSource::CapDefault,
            )),
        },
        ArgumentBinding::CapSetting { urn } => {
            let setting = context
                .cap_settings
                .and_then(|s| s.get(&urn.to_string()))
                .cloned();
            match setting {
                Some(value) => Ok(ResolvedArgument::new(
                    arg_name,
                    encode_value(&value),
                    ArgumentSource::CapSetting,
                )),
                None if is_required => Err(required_missing()),
                None => Ok(ResolvedArgument::new(
                    arg_name,
                    Vec::new(),
                    ArgumentSource::CapSetting,
                )),
            }
        }
        ArgumentBinding::Literal { value } => Ok(ResolvedArgument::new(
            arg_name,
            encode_value(value),
            ArgumentSource::Literal,
        )),
        ArgumentBinding::Slot { name, .. } => {
            let bytes = context
                .slot_values
                .and_then(|s| s.get(name))
                .cloned()
                .ok_or_else(|| ExecError::SlotNotProvided { name: name.clone() })?;
            Ok(ResolvedArgument::new(arg_name, bytes, ArgumentSource::Slot))
        }
        ArgumentBinding::PlanMetadata { key } => {
            let value = context
                .plan_metadata
                .and_then(|m| m.get(key))
                .ok_or_else(|| ExecError::PlanMetadataMissing { key: key.clone() })?;
            Ok(ResolvedArgument::new(
                arg_name,
                encode_value(value),
                ArgumentSource::PlanMetadata,
            ))
        }
    }
}
