use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Maximum packet payload: 16 MiB, enforced on both read and write.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Read one packet.
///
/// Returns `Ok(None)` on a clean EOF at a packet boundary. EOF inside
/// the header or payload is [`TransportError::UnexpectedEof`]. Partial
/// reads loop until the declared length is satisfied.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::UnexpectedEof);
        }
        filled += n;
    }

    let length = u32::from_be_bytes(header) as usize;
    if length > MAX_PACKET_SIZE {
        return Err(TransportError::PacketTooLarge {
            size: length,
            max: MAX_PACKET_SIZE,
        });
    }

    let mut payload = vec![0u8; length];
    let mut filled = 0;
    while filled < length {
        let n = reader.read(&mut payload[filled..]).await?;
        if n == 0 {
            return Err(TransportError::UnexpectedEof);
        }
        filled += n;
    }
    Ok(Some(payload))
}

/// Write one packet with its length prefix.
///
/// An oversized payload fails before any byte is emitted.
pub async fn write_packet<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_PACKET_SIZE {
        return Err(TransportError::PacketTooLarge {
            size: payload.len(),
            max: MAX_PACKET_SIZE,
        });
    }
    let header = (payload.len() as u32).to_be_bytes();
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads packets from an async byte stream.
pub struct PacketReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next packet, or `None` at clean end of stream.
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        read_packet(&mut self.inner).await
    }
}

/// Writes packets to an async byte stream.
pub struct PacketWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        write_packet(&mut self.inner, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_write_produces_length_prefix() {
        // S5: 0xDEADBEEF frames as 00 00 00 04 DE AD BE EF.
        let mut out = Cursor::new(Vec::new());
        write_packet(&mut out, &[0xDE, 0xAD, 0xBE, 0xEF]).await.unwrap();
        assert_eq!(
            out.into_inner(),
            vec![0x00, 0x00, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[tokio::test]
    async fn test_read_round_trip() {
        let mut out = Cursor::new(Vec::new());
        write_packet(&mut out, b"hello packet").await.unwrap();
        let bytes = out.into_inner();
        let mut reader = &bytes[..];
        let payload = read_packet(&mut reader).await.unwrap().unwrap();
        assert_eq!(payload, b"hello packet");
        // Stream exhausted cleanly.
        assert!(read_packet(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let mut out = Cursor::new(Vec::new());
        write_packet(&mut out, b"").await.unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        let mut reader = &bytes[..];
        assert_eq!(read_packet(&mut reader).await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let mut reader: &[u8] = &[];
        assert!(read_packet(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_in_header() {
        let mut reader: &[u8] = &[0x00, 0x00];
        assert!(matches!(
            read_packet(&mut reader).await.unwrap_err(),
            TransportError::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn test_eof_in_payload() {
        let mut reader: &[u8] = &[0x00, 0x00, 0x00, 0x08, 0x01, 0x02];
        assert!(matches!(
            read_packet(&mut reader).await.unwrap_err(),
            TransportError::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn test_oversized_write_emits_nothing() {
        let payload = vec![0u8; MAX_PACKET_SIZE + 1];
        let mut out = Cursor::new(Vec::new());
        let err = write_packet(&mut out, &payload).await.unwrap_err();
        assert!(matches!(err, TransportError::PacketTooLarge { .. }));
        assert!(out.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_declared_length_rejected_on_read() {
        let mut framed = ((MAX_PACKET_SIZE as u32) + 1).to_be_bytes().to_vec();
        framed.extend_from_slice(&[0u8; 16]);
        let mut reader = &framed[..];
        assert!(matches!(
            read_packet(&mut reader).await.unwrap_err(),
            TransportError::PacketTooLarge { .. }
        ));
    }

    #[tokio::test]
    async fn test_multiple_packets_in_sequence() {
        let mut out = Cursor::new(Vec::new());
        let mut writer = PacketWriter::new(&mut out);
        writer.write(b"first").await.unwrap();
        writer.write(b"second").await.unwrap();
        let bytes = out.into_inner();
        let mut reader = PacketReader::new(&bytes[..]);
        assert_eq!(reader.read().await.unwrap().as_deref(), Some(&b"first"[..]));
        assert_eq!(reader.read().await.unwrap().as_deref(), Some(&b"second"[..]));
        assert!(reader.read().await.unwrap().is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn round_trip(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    let mut out = Cursor::new(Vec::new());
                    write_packet(&mut out, &payload).await.unwrap();
                    let bytes = out.into_inner();
                    let mut reader = &bytes[..];
                    let read = read_packet(&mut reader).await.unwrap().unwrap();
                    assert_eq!(read, payload);
                });
            }
        }
    }
}
