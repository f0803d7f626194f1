//! All LanChess protocol frame types.
//!
//! Every frame on the wire is one opcode byte followed by an optional UTF-8
//! JSON payload. The discovery channel (UDP) and the relay channel (TCP)
//! share this catalogue but use disjoint opcode ranges.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Color;

// ── Opcode catalogue ──────────────────────────────────────────────────────────

/// All opcode bytes defined by the protocol.
///
/// 0x01–0x0F: discovery channel (UDP). 0x10–0x1F: relay channel (TCP),
/// with 0x16–0x18 reserved for replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // Discovery channel (0x01–0x0F)
    LanPlayer = 0x01,
    Keepalive = 0x02,
    Ack = 0x03,
    Accept = 0x04,
    Decline = 0x05,
    GameIsReady = 0x06,
    Quit = 0x07,
    // Relay channel (0x10–0x1F)
    GameFull = 0x10,
    GameDelete = 0x11,
    GameJoin = 0x12,
    Move = 0x13,
    Claim = 0x14,
    Withdrawal = 0x15,
    Successful = 0x16,
    Unsuccessful = 0x17,
    Unreachable = 0x18,
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(Opcode::LanPlayer),
            0x02 => Ok(Opcode::Keepalive),
            0x03 => Ok(Opcode::Ack),
            0x04 => Ok(Opcode::Accept),
            0x05 => Ok(Opcode::Decline),
            0x06 => Ok(Opcode::GameIsReady),
            0x07 => Ok(Opcode::Quit),
            0x10 => Ok(Opcode::GameFull),
            0x11 => Ok(Opcode::GameDelete),
            0x12 => Ok(Opcode::GameJoin),
            0x13 => Ok(Opcode::Move),
            0x14 => Ok(Opcode::Claim),
            0x15 => Ok(Opcode::Withdrawal),
            0x16 => Ok(Opcode::Successful),
            0x17 => Ok(Opcode::Unsuccessful),
            0x18 => Ok(Opcode::Unreachable),
            _ => Err(()),
        }
    }
}

// ── Discovery payloads ────────────────────────────────────────────────────────

/// LANPLAYER (0x01): any subset of a peer's characteristics.
///
/// Absent fields are omitted from the serialized payload entirely, so a
/// partial update never resets what it does not mention. Merging two updates
/// is therefore commutative per field (last write wins per field, not per
/// message).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    /// Stable identity of the announcing player, generated once per process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_uuid: Option<Uuid>,
    /// Display name; mutable at any time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    /// Seat color the player intends to occupy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_color: Option<Color>,
    /// Identity of the game this player is hosting, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_uuid: Option<Uuid>,
    /// Display name of the hosted game.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_name: Option<String>,
    /// True while the sender is inviting the receiver to play.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inviting: Option<bool>,
}

impl PlayerUpdate {
    /// True when no field is set; such an update carries no information.
    pub fn is_empty(&self) -> bool {
        self.player_uuid.is_none()
            && self.player_name.is_none()
            && self.player_color.is_none()
            && self.game_uuid.is_none()
            && self.game_name.is_none()
            && self.inviting.is_none()
    }
}

// ── Relay payloads ────────────────────────────────────────────────────────────

/// GAMEFULL (0x10): announce a game to the relay host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFullMsg {
    /// Identity of the game being created.
    pub uuid: Uuid,
    /// Display name of the game.
    pub name: String,
}

/// GAMEJOIN (0x12): bind a seat in an existing game to this connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameJoinMsg {
    /// Game to join; must already exist on the host.
    pub game_uuid: Uuid,
    /// Seat the player takes.
    pub player_color: Color,
    /// Display name of the joining player.
    pub player_name: String,
    /// Stable identity of the joining player.
    pub player_uuid: Uuid,
}

/// MOVE (0x13): an opaque move token to forward to the opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveMsg {
    /// Sender's identity; locates their game and seat on the host.
    pub player_uuid: Uuid,
    /// Move token, passed through without legality interpretation.
    #[serde(rename = "move")]
    pub mv: String,
}

/// CLAIM (0x14): an opaque draw-claim token to forward to the opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMsg {
    pub player_uuid: Uuid,
    /// Claim token; see [`crate::domain::DrawClaim`] for canonical spellings.
    pub claim: String,
}

/// WITHDRAWAL (0x15): the sender resigns the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalMsg {
    pub player_uuid: Uuid,
}

// ── Top-level frame enum ──────────────────────────────────────────────────────

/// One decoded wire frame: the opcode plus its payload, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    // Discovery channel
    LanPlayer(PlayerUpdate),
    Keepalive,
    Ack,
    Accept,
    Decline,
    GameIsReady,
    Quit,
    // Relay channel
    GameFull(GameFullMsg),
    /// Payload is the bare game uuid serialized as a JSON string.
    GameDelete(Uuid),
    GameJoin(GameJoinMsg),
    Move(MoveMsg),
    Claim(ClaimMsg),
    Withdrawal(WithdrawalMsg),
    Successful,
    Unsuccessful,
    Unreachable,
}

impl Frame {
    /// The opcode byte this frame carries on the wire.
    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::LanPlayer(_) => Opcode::LanPlayer,
            Frame::Keepalive => Opcode::Keepalive,
            Frame::Ack => Opcode::Ack,
            Frame::Accept => Opcode::Accept,
            Frame::Decline => Opcode::Decline,
            Frame::GameIsReady => Opcode::GameIsReady,
            Frame::Quit => Opcode::Quit,
            Frame::GameFull(_) => Opcode::GameFull,
            Frame::GameDelete(_) => Opcode::GameDelete,
            Frame::GameJoin(_) => Opcode::GameJoin,
            Frame::Move(_) => Opcode::Move,
            Frame::Claim(_) => Opcode::Claim,
            Frame::Withdrawal(_) => Opcode::Withdrawal,
            Frame::Successful => Opcode::Successful,
            Frame::Unsuccessful => Opcode::Unsuccessful,
            Frame::Unreachable => Opcode::Unreachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_try_from_round_trip() {
        for op in [
            Opcode::LanPlayer,
            Opcode::Keepalive,
            Opcode::Ack,
            Opcode::Accept,
            Opcode::Decline,
            Opcode::GameIsReady,
            Opcode::Quit,
            Opcode::GameFull,
            Opcode::GameDelete,
            Opcode::GameJoin,
            Opcode::Move,
            Opcode::Claim,
            Opcode::Withdrawal,
            Opcode::Successful,
            Opcode::Unsuccessful,
            Opcode::Unreachable,
        ] {
            assert_eq!(Opcode::try_from(op as u8), Ok(op));
        }
    }

    #[test]
    fn test_opcode_try_from_rejects_unassigned_bytes() {
        assert_eq!(Opcode::try_from(0x00), Err(()));
        assert_eq!(Opcode::try_from(0x0F), Err(()));
        assert_eq!(Opcode::try_from(0x19), Err(()));
        assert_eq!(Opcode::try_from(0xFF), Err(()));
    }

    #[test]
    fn test_partial_update_omits_absent_fields() {
        let update = PlayerUpdate {
            player_name: Some("Alice".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"player_name":"Alice"}"#);
    }

    #[test]
    fn test_empty_update_serializes_to_empty_object() {
        let update = PlayerUpdate::default();
        assert!(update.is_empty());
        assert_eq!(serde_json::to_string(&update).unwrap(), "{}");
    }

    #[test]
    fn test_move_payload_uses_move_key() {
        let msg = MoveMsg {
            player_uuid: Uuid::nil(),
            mv: "e2e4".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""move":"e2e4""#));
    }
}
