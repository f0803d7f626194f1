//! Frame delimiting for the TCP relay channel.
//!
//! A UDP datagram is atomic, but TCP is a byte stream, so each relay frame
//! is prefixed with a 4-byte big-endian length:
//! ```text
//! [len:4][opcode:1][payload:len-1]
//! ```
//! Both the relay server and the session client use these helpers so the
//! two ends can never disagree on delimiting.

use lanchess_core::protocol::{decode_frame, encode_frame, Frame, FrameError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; anything larger is a protocol violation,
/// not a legitimate chess exchange.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Errors raised while reading or writing a length-prefixed frame.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The underlying stream failed or closed.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] FrameError),

    /// The declared length exceeds [`MAX_FRAME_LEN`].
    #[error("declared frame length {0} exceeds maximum {MAX_FRAME_LEN}")]
    FrameTooLarge(usize),
}

/// Writes one length-prefixed frame to `writer` and flushes it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame from `reader`.
///
/// An EOF before the length prefix surfaces as
/// [`std::io::ErrorKind::UnexpectedEof`]; the caller decides whether that is
/// an orderly close or a broken peer.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FramingError::FrameTooLarge(len));
    }

    let mut frame_buf = vec![0u8; len];
    reader.read_exact(&mut frame_buf).await?;
    Ok(decode_frame(&frame_buf)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lanchess_core::protocol::MoveMsg;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let frame = Frame::Move(MoveMsg {
            player_uuid: Uuid::new_v4(),
            mv: "e2e4".to_string(),
        });

        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.expect("write");

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.expect("read");
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_two_frames_back_to_back_are_delimited() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Successful).await.unwrap();
        write_frame(&mut buf, &Frame::Keepalive).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), Frame::Successful);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), Frame::Keepalive);
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FramingError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn test_truncated_stream_surfaces_unexpected_eof() {
        // Length prefix promises 10 bytes; only 3 arrive.
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&[0x13, b'{', b'}']);

        let mut cursor = std::io::Cursor::new(buf);
        match read_frame(&mut cursor).await {
            Err(FramingError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("expected Io(UnexpectedEof), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_surfaces_codec_error() {
        let mut buf = Vec::new();
        let bogus = [lanchess_core::protocol::Opcode::Move as u8, b'x'];
        buf.extend_from_slice(&(bogus.len() as u32).to_be_bytes());
        buf.extend_from_slice(&bogus);

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FramingError::Codec(_)));
    }
}
