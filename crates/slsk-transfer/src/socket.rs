//! The raw transfer-connection protocol.
//!
//! Once a `TransferRequest`/`TransferResponse` exchange on the peer-message
//! channel agrees to a transfer, the two sides open (or repurpose) a raw
//! socket. The very first thing exchanged on it is an 8-byte little-endian
//! resume offset; everything after that is the file's bytes with no further
//! framing.

use crate::error::TransferError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Send the 8-byte little-endian resume offset that opens a transfer
/// socket.
///
/// # Errors
///
/// Returns [`TransferError::Io`] on any write failure.
pub async fn send_offset<W>(stream: &mut W, offset: u64) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&offset.to_le_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read the 8-byte little-endian resume offset from a freshly opened
/// transfer socket.
///
/// # Errors
///
/// Returns [`TransferError::Io`] if the stream closes before 8 bytes
/// arrive.
pub async fn recv_offset<R>(stream: &mut R) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf).await?;
    Ok(u64::from_le_bytes(buf))
}

/// Read up to `buf.len()` bytes of file content.
///
/// # Errors
///
/// Returns [`TransferError::Io`] on any read failure. A return of `Ok(0)`
/// means the remote closed the socket.
pub async fn read_chunk<R>(stream: &mut R, buf: &mut [u8]) -> Result<usize, TransferError>
where
    R: AsyncRead + Unpin,
{
    Ok(stream.read(buf).await?)
}

/// Write a chunk of file content.
///
/// # Errors
///
/// Returns [`TransferError::Io`] on any write failure.
pub async fn write_chunk<W>(stream: &mut W, data: &[u8]) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(data).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offset_round_trips() {
        let (mut a, mut b) = tokio::io::duplex(64);
        send_offset(&mut a, 4096).await.unwrap();
        let offset = recv_offset(&mut b).await.unwrap();
        assert_eq!(offset, 4096);
    }

    #[tokio::test]
    async fn chunk_round_trips() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_chunk(&mut a, b"some file bytes").await.unwrap();
        let mut buf = [0u8; 32];
        let n = read_chunk(&mut b, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"some file bytes");
    }

    #[tokio::test]
    async fn recv_offset_fails_on_short_stream() {
        let (a, mut b) = tokio::io::duplex(4);
        drop(a);
        let err = recv_offset(&mut b).await.unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }
}
