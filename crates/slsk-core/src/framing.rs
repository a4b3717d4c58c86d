//! Length-prefixed message framing shared by the server, peer-message, and
//! distributed-message TCP streams.
//!
//! Every frame is a 4-byte little-endian payload length followed by the
//! payload. Server and peer frames carry a 4-byte little-endian message
//! code as the first four bytes of the payload; distributed frames carry a
//! single byte. Transfer (raw) connections do not use this framing past
//! their initial 8-byte offset exchange — see `slsk-transfer`.

use crate::error::FrameError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Default ceiling on a single frame's payload, rejected before allocation.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Width of the message code prefix within a frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeWidth {
    /// Server and peer-message channels use a 4-byte code.
    Four,
    /// The distributed channel uses a 1-byte code.
    One,
}

/// A decoded frame: message code plus the remaining payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message code, widened to `u32` regardless of wire width.
    pub code: u32,
    /// Payload bytes following the code.
    pub payload: Vec<u8>,
}

/// Read one frame from `stream`.
///
/// # Errors
///
/// Returns [`FrameError::Closed`] if the stream reaches EOF before any
/// bytes are read, [`FrameError::Truncated`] if it ends mid-frame, and
/// [`FrameError::TooLarge`] if the declared length exceeds `max_size`.
pub async fn read_frame<R>(
    stream: &mut R,
    code_width: CodeWidth,
    max_size: u32,
) -> Result<Frame, FrameError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(FrameError::Io(e)),
    }
    let declared = u32::from_le_bytes(len_buf);
    if declared > max_size {
        return Err(FrameError::TooLarge {
            declared,
            max: max_size,
        });
    }

    let code_width_bytes = match code_width {
        CodeWidth::Four => 4,
        CodeWidth::One => 1,
    };
    if (declared as usize) < code_width_bytes {
        return Err(FrameError::Truncated);
    }

    let mut body = vec![0u8; declared as usize];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::Truncated,
            _ => FrameError::Io(e),
        })?;

    let code = match code_width {
        CodeWidth::Four => u32::from_le_bytes([body[0], body[1], body[2], body[3]]),
        CodeWidth::One => body[0] as u32,
    };

    Ok(Frame {
        code,
        payload: body.split_off(code_width_bytes),
    })
}

/// Write one frame to `stream`.
///
/// # Errors
///
/// Returns [`FrameError::Io`] on any underlying write failure.
pub async fn write_frame<W>(
    stream: &mut W,
    code: u32,
    payload: &[u8],
    code_width: CodeWidth,
) -> Result<(), FrameError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let code_bytes: Vec<u8> = match code_width {
        CodeWidth::Four => code.to_le_bytes().to_vec(),
        CodeWidth::One => vec![code as u8],
    };

    let total_len = (code_bytes.len() + payload.len()) as u32;
    let mut buf = Vec::with_capacity(4 + total_len as usize);
    buf.extend_from_slice(&total_len.to_le_bytes());
    buf.extend_from_slice(&code_bytes);
    buf.extend_from_slice(payload);

    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Inflate a zlib-compressed peer payload.
///
/// Some peer message kinds (e.g. folder listings) are compressed; the
/// caller decides whether to call this based on message kind, not a flag
/// in the frame itself.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| FrameError::Decompression(e.to_string()))?;
    Ok(out)
}

/// Deflate a payload with zlib for messages that are sent compressed.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| FrameError::Decompression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| FrameError::Decompression(e.to_string()))
}

/// Read a length-prefixed UTF-8 string from the front of `buf`, returning
/// the decoded string and the remaining slice.
///
/// # Errors
///
/// Returns [`FrameError::Truncated`] if `buf` is shorter than the declared
/// string length.
pub fn read_string(buf: &[u8]) -> Result<(String, &[u8]), FrameError> {
    if buf.len() < 4 {
        return Err(FrameError::Truncated);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return Err(FrameError::Truncated);
    }
    let s = String::from_utf8_lossy(&buf[4..4 + len]).into_owned();
    Ok((s, &buf[4 + len..]))
}

/// Append a length-prefixed UTF-8 string to `buf`.
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_four_byte_code() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, 42, b"hello", CodeWidth::Four)
            .await
            .unwrap();
        let frame = read_frame(&mut b, CodeWidth::Four, MAX_FRAME_SIZE)
            .await
            .unwrap();
        assert_eq!(frame.code, 42);
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn round_trips_one_byte_code() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, 3, b"x", CodeWidth::One).await.unwrap();
        let frame = read_frame(&mut b, CodeWidth::One, MAX_FRAME_SIZE)
            .await
            .unwrap();
        assert_eq!(frame.code, 3);
        assert_eq!(frame.payload, b"x");
    }

    #[tokio::test]
    async fn rejects_oversize_frame() {
        let (mut a, mut b) = tokio::io::duplex(65536);
        let payload = vec![0u8; 128];
        write_frame(&mut a, 1, &payload, CodeWidth::Four)
            .await
            .unwrap();
        let err = read_frame(&mut b, CodeWidth::Four, 16).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn closed_stream_before_any_bytes() {
        let (a, mut b) = tokio::io::duplex(16);
        drop(a);
        let err = read_frame(&mut b, CodeWidth::Four, MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }

    #[test]
    fn zlib_round_trip() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = compress(&original).unwrap();
        assert!(compressed.len() < original.len());
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn string_round_trip() {
        let mut buf = Vec::new();
        write_string(&mut buf, "soulseek");
        buf.extend_from_slice(b"trailing");
        let (s, rest) = read_string(&buf).unwrap();
        assert_eq!(s, "soulseek");
        assert_eq!(rest, b"trailing");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_frame_round_trip(code in any::<u32>(), payload in prop::collection::vec(any::<u8>(), 0..512)) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async {
                    let (mut a, mut b) = tokio::io::duplex(8192);
                    write_frame(&mut a, code, &payload, CodeWidth::Four).await.unwrap();
                    let frame = read_frame(&mut b, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();
                    prop_assert_eq!(frame.code, code);
                    prop_assert_eq!(frame.payload, payload);
                    Ok(())
                })?;
            }

            #[test]
            fn prop_string_round_trip(s in "[a-zA-Z0-9 ]{0,64}") {
                let mut buf = Vec::new();
                write_string(&mut buf, &s);
                let (decoded, rest) = read_string(&buf).unwrap();
                prop_assert_eq!(decoded, s);
                prop_assert!(rest.is_empty());
            }
        }
    }
}
