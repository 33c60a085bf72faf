//! Length-prefixed frames: `[len: u32 big-endian][payload: len bytes]`.
//!
//! The daemon reads and writes frames on tokio streams; the client uses the
//! blocking variants on `std` streams. Short reads and writes loop until
//! complete. EOF at a frame boundary is [`WireError::ConnectionClosed`]; EOF
//! inside a frame is [`WireError::TruncatedFrame`].

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// Default cap on a single frame's payload (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Size of the length prefix.
pub const FRAME_HEADER_BYTES: usize = 4;

// ---------------------------------------------------------------------------
// Async (daemon side)
// ---------------------------------------------------------------------------

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        len: u32::MAX,
        max: DEFAULT_MAX_FRAME_BYTES,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, rejecting payloads longer than `max_frame_bytes` before
/// reading them.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: u32) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_BYTES];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                WireError::ConnectionClosed
            } else {
                WireError::TruncatedFrame
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header);
    if len > max_frame_bytes {
        return Err(WireError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => WireError::TruncatedFrame,
            _ => WireError::Io(err),
        })?;
    Ok(payload)
}

// ---------------------------------------------------------------------------
// Blocking (client side)
// ---------------------------------------------------------------------------

/// Write one frame on a blocking stream.
pub fn write_frame_blocking<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        len: u32::MAX,
        max: DEFAULT_MAX_FRAME_BYTES,
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame on a blocking stream.
pub fn read_frame_blocking<R: Read>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> Result<Vec<u8>, WireError> {
    let mut header = [0u8; FRAME_HEADER_BYTES];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            return Err(if filled == 0 {
                WireError::ConnectionClosed
            } else {
                WireError::TruncatedFrame
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header);
    if len > max_frame_bytes {
        return Err(WireError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => WireError::TruncatedFrame,
            _ => WireError::Io(err),
        })?;
    Ok(payload)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    #[case(Vec::new())]
    #[case(b"x".to_vec())]
    #[case(b"hello frames".to_vec())]
    #[case(vec![0xAB; 64 * 1024])]
    #[tokio::test]
    async fn async_roundtrip(#[case] payload: Vec<u8>) {
        let (mut client, mut server) = tokio::io::duplex(256 * 1024);
        write_frame(&mut client, &payload).await.expect("write");
        let read = read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES)
            .await
            .expect("read");
        assert_eq!(read, payload);
    }

    #[tokio::test]
    async fn async_preserves_frame_boundaries() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, b"first").await.expect("write 1");
        write_frame(&mut client, b"").await.expect("write 2");
        write_frame(&mut client, b"third").await.expect("write 3");

        assert_eq!(read_frame(&mut server, 64).await.expect("read 1"), b"first");
        assert_eq!(read_frame(&mut server, 64).await.expect("read 2"), b"");
        assert_eq!(read_frame(&mut server, 64).await.expect("read 3"), b"third");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_payload() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        // Announce a 1 GiB frame without sending it.
        client
            .write_all(&(1u32 << 30).to_be_bytes())
            .await
            .expect("header");

        let err = read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES)
            .await
            .expect_err("must reject");
        assert!(matches!(err, WireError::FrameTooLarge { len, .. } if len == 1 << 30));
    }

    #[tokio::test]
    async fn eof_at_boundary_vs_mid_frame() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        drop(client);
        let err = read_frame(&mut server, 64).await.expect_err("closed");
        assert!(matches!(err, WireError::ConnectionClosed), "got: {err}");

        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&8u32.to_be_bytes()).await.expect("header");
        client.write_all(b"half").await.expect("partial payload");
        drop(client);
        let err = read_frame(&mut server, 64).await.expect_err("truncated");
        assert!(matches!(err, WireError::TruncatedFrame), "got: {err}");
    }

    #[test]
    fn blocking_roundtrip() {
        let mut buf = Vec::new();
        write_frame_blocking(&mut buf, b"over the wire").expect("write");

        let mut cursor = Cursor::new(buf);
        let read = read_frame_blocking(&mut cursor, DEFAULT_MAX_FRAME_BYTES).expect("read");
        assert_eq!(read, b"over the wire");
    }

    #[test]
    fn blocking_truncated_header_is_mid_frame() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0]);
        let err = read_frame_blocking(&mut cursor, 64).expect_err("short header");
        assert!(matches!(err, WireError::TruncatedFrame), "got: {err}");
    }

    #[test]
    fn blocking_empty_stream_is_closed() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_frame_blocking(&mut cursor, 64).expect_err("empty");
        assert!(matches!(err, WireError::ConnectionClosed), "got: {err}");
    }
}
