//! Protocol module containing the frame catalogue and the wire codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_frame, encode_frame, FrameError};
pub use messages::*;
