//! lanchess-core: wire protocol and domain types shared by every
//! networking component.
//!
//! Contains no I/O. The discovery and relay services in `lanchess-net`
//! build on the frame catalogue and codec defined here.

pub mod domain;
pub mod protocol;

pub use domain::{Color, DrawClaim};
pub use protocol::{decode_frame, encode_frame, Frame, FrameError, Opcode};
