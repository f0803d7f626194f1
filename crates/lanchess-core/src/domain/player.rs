//! Player-facing domain types: seat colors and draw-claim kinds.
//!
//! The networking layer never interprets moves; claims are the one piece of
//! game vocabulary it names, because the relay reply a claim produces depends
//! on whether the opponent is reachable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seat color within a game. Two players of the same color can never be
/// matched against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// The color sitting across the board.
    pub fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

/// Kinds of draw claim a player may send through the relay.
///
/// The relay forwards the token unexamined; this enum only fixes the
/// canonical tokens so both sides agree on spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrawClaim {
    /// Threefold repetition of the position.
    Threefold,
    /// Fifty moves without a capture or a pawn move.
    FiftyMoves,
}

impl DrawClaim {
    /// Canonical wire token for this claim kind.
    pub fn as_token(self) -> &'static str {
        match self {
            DrawClaim::Threefold => "threefold",
            DrawClaim::FiftyMoves => "fifty-moves",
        }
    }
}

/// Error returned when a claim token is not one of the canonical spellings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown draw claim token: {0:?}")]
pub struct ParseDrawClaimError(pub String);

impl FromStr for DrawClaim {
    type Err = ParseDrawClaimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threefold" => Ok(DrawClaim::Threefold),
            "fifty-moves" => Ok(DrawClaim::FiftyMoves),
            other => Err(ParseDrawClaimError(other.to_string())),
        }
    }
}
