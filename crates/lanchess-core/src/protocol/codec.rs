//! Wire codec for LanChess frames.
//!
//! Wire format:
//! ```text
//! [opcode:1][payload:N]
//! ```
//! The payload is UTF-8 JSON for opcodes that carry one, empty otherwise.
//! A UDP datagram carries exactly one frame; on TCP the session layer
//! delimits frames with a 4-byte big-endian length prefix before calling
//! into this codec.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::protocol::messages::{
    ClaimMsg, Frame, GameFullMsg, GameJoinMsg, MoveMsg, Opcode, PlayerUpdate, WithdrawalMsg,
};

/// Errors that can occur during frame encoding or decoding.
///
/// A decode error from a remote peer is a protocol violation: log it, drop
/// the frame, and keep the receive loop running.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// The byte slice holds no opcode byte at all.
    #[error("empty frame")]
    EmptyFrame,

    /// The opcode byte is not a recognized value.
    #[error("unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    /// The payload is not parseable as the declared shape for its opcode.
    #[error("malformed {opcode:?} payload: {reason}")]
    MalformedPayload { opcode: Opcode, reason: String },

    /// Serialization of an outbound payload failed.
    #[error("failed to serialize {opcode:?} payload: {reason}")]
    Serialize { opcode: Opcode, reason: String },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Frame`] into the opcode byte followed by its JSON payload.
///
/// # Errors
///
/// Returns [`FrameError::Serialize`] if JSON serialization fails.
///
/// # Examples
///
/// ```rust
/// use lanchess_core::protocol::{decode_frame, encode_frame, Frame};
///
/// let bytes = encode_frame(&Frame::Keepalive).unwrap();
/// assert_eq!(decode_frame(&bytes).unwrap(), Frame::Keepalive);
/// ```
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let opcode = frame.opcode();
    let mut buf = vec![opcode as u8];
    match frame {
        Frame::LanPlayer(m) => append_payload(&mut buf, opcode, m)?,
        Frame::GameFull(m) => append_payload(&mut buf, opcode, m)?,
        Frame::GameDelete(uuid) => append_payload(&mut buf, opcode, uuid)?,
        Frame::GameJoin(m) => append_payload(&mut buf, opcode, m)?,
        Frame::Move(m) => append_payload(&mut buf, opcode, m)?,
        Frame::Claim(m) => append_payload(&mut buf, opcode, m)?,
        Frame::Withdrawal(m) => append_payload(&mut buf, opcode, m)?,
        // No payload
        Frame::Keepalive
        | Frame::Ack
        | Frame::Accept
        | Frame::Decline
        | Frame::GameIsReady
        | Frame::Quit
        | Frame::Successful
        | Frame::Unsuccessful
        | Frame::Unreachable => {}
    }
    Ok(buf)
}

/// Decodes one [`Frame`] from a byte slice.
///
/// Trailing bytes after a payloadless opcode are ignored; datagrams are
/// atomic so there is never a partial frame to resume.
///
/// # Errors
///
/// Returns [`FrameError`] if the slice is empty, the opcode is unknown, or
/// the payload does not parse as the declared shape.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let (&first, payload) = bytes.split_first().ok_or(FrameError::EmptyFrame)?;
    let opcode = Opcode::try_from(first).map_err(|_| FrameError::UnknownOpcode(first))?;

    let frame = match opcode {
        Opcode::LanPlayer => Frame::LanPlayer(parse_payload(opcode, payload)?),
        Opcode::Keepalive => Frame::Keepalive,
        Opcode::Ack => Frame::Ack,
        Opcode::Accept => Frame::Accept,
        Opcode::Decline => Frame::Decline,
        Opcode::GameIsReady => Frame::GameIsReady,
        Opcode::Quit => Frame::Quit,
        Opcode::GameFull => Frame::GameFull(parse_payload::<GameFullMsg>(opcode, payload)?),
        Opcode::GameDelete => Frame::GameDelete(parse_payload(opcode, payload)?),
        Opcode::GameJoin => Frame::GameJoin(parse_payload::<GameJoinMsg>(opcode, payload)?),
        Opcode::Move => Frame::Move(parse_payload::<MoveMsg>(opcode, payload)?),
        Opcode::Claim => Frame::Claim(parse_payload::<ClaimMsg>(opcode, payload)?),
        Opcode::Withdrawal => Frame::Withdrawal(parse_payload::<WithdrawalMsg>(opcode, payload)?),
        Opcode::Successful => Frame::Successful,
        Opcode::Unsuccessful => Frame::Unsuccessful,
        Opcode::Unreachable => Frame::Unreachable,
    };
    Ok(frame)
}

// ── Payload helpers ───────────────────────────────────────────────────────────

fn append_payload<T: Serialize>(
    buf: &mut Vec<u8>,
    opcode: Opcode,
    payload: &T,
) -> Result<(), FrameError> {
    let bytes = serde_json::to_vec(payload).map_err(|e| FrameError::Serialize {
        opcode,
        reason: e.to_string(),
    })?;
    buf.extend_from_slice(&bytes);
    Ok(())
}

fn parse_payload<T: DeserializeOwned>(opcode: Opcode, payload: &[u8]) -> Result<T, FrameError> {
    serde_json::from_slice(payload).map_err(|e| FrameError::MalformedPayload {
        opcode,
        reason: e.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
