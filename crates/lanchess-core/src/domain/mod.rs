//! Domain entities shared across the networking subsystem.

mod player;

pub use player::{Color, DrawClaim, ParseDrawClaimError};
