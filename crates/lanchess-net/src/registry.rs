//! In-memory table of remote players and the games they advertise.
//!
//! Keyed by the peer's socket address as observed on inbound datagrams.
//! Three independent locks guard the three logical tables (players, games,
//! pending invitation) so unrelated updates never contend.
//!
//! `upsert` merges only the fields present in a partial update; it never
//! resets a field the update does not mention, which makes merging
//! commutative per field when datagrams arrive out of order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use lanchess_core::domain::Color;
use lanchess_core::protocol::PlayerUpdate;
use uuid::Uuid;

/// Network endpoint identifying one remote peer instance.
pub type PeerAddr = SocketAddr;

/// Everything known about one remote player.
///
/// The first sighting creates the record with whatever subset of fields that
/// frame carried; later frames fill the gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerRecord {
    /// Stable identity, generated once by the remote process.
    pub uuid: Option<Uuid>,
    /// Display name; mutable.
    pub name: Option<String>,
    /// Declared seat color.
    pub color: Option<Color>,
    /// True while this peer has an invitation outstanding toward us.
    pub inviting: bool,
    /// Set when a keepalive was sent and no ack has arrived yet.
    pub awaiting_ack: bool,
}

/// A game a remote peer advertises over discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameAd {
    pub uuid: Option<Uuid>,
    pub name: Option<String>,
}

/// Thread-safe registry of remote players and advertised games.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    players: Mutex<HashMap<PeerAddr, PlayerRecord>>,
    games: Mutex<HashMap<PeerAddr, GameAd>>,
    invitation: Mutex<Option<Uuid>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `update` into the records for `addr`, creating them on first
    /// sighting. Returns `true` when this address was not known before.
    pub fn upsert(&self, addr: PeerAddr, update: &PlayerUpdate) -> bool {
        let first_sighting;
        {
            let mut players = self.players.lock().unwrap();
            first_sighting = !players.contains_key(&addr);
            let record = players.entry(addr).or_default();
            if let Some(uuid) = update.player_uuid {
                record.uuid = Some(uuid);
            }
            if let Some(name) = &update.player_name {
                record.name = Some(name.clone());
            }
            if let Some(color) = update.player_color {
                record.color = Some(color);
            }
            if let Some(inviting) = update.inviting {
                record.inviting = inviting;
            }
        }
        if update.game_uuid.is_some() || update.game_name.is_some() {
            let mut games = self.games.lock().unwrap();
            let ad = games.entry(addr).or_default();
            if let Some(uuid) = update.game_uuid {
                ad.uuid = Some(uuid);
            }
            if let Some(name) = &update.game_name {
                ad.name = Some(name.clone());
            }
        }
        first_sighting
    }

    /// Forgets everything recorded about `addr`. Returns `true` when a
    /// player record existed.
    pub fn remove(&self, addr: PeerAddr) -> bool {
        let had_player = self.players.lock().unwrap().remove(&addr).is_some();
        self.games.lock().unwrap().remove(&addr);
        had_player
    }

    pub fn get(&self, addr: PeerAddr) -> Option<PlayerRecord> {
        self.players.lock().unwrap().get(&addr).cloned()
    }

    /// Snapshot of every known player.
    pub fn all(&self) -> Vec<(PeerAddr, PlayerRecord)> {
        self.players
            .lock()
            .unwrap()
            .iter()
            .map(|(addr, record)| (*addr, record.clone()))
            .collect()
    }

    /// Snapshot of every advertised game.
    pub fn games(&self) -> Vec<(PeerAddr, GameAd)> {
        self.games
            .lock()
            .unwrap()
            .iter()
            .map(|(addr, ad)| (*addr, ad.clone()))
            .collect()
    }

    /// Finds the player with the given stable identity.
    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<(PeerAddr, PlayerRecord)> {
        self.players
            .lock()
            .unwrap()
            .iter()
            .find(|(_, record)| record.uuid == Some(uuid))
            .map(|(addr, record)| (*addr, record.clone()))
    }

    // ── Liveness bookkeeping ──────────────────────────────────────────────────

    /// Marks every known peer as awaiting an ack and returns their addresses.
    pub fn mark_all_awaiting_ack(&self) -> Vec<PeerAddr> {
        let mut players = self.players.lock().unwrap();
        players
            .iter_mut()
            .map(|(addr, record)| {
                record.awaiting_ack = true;
                *addr
            })
            .collect()
    }

    /// Clears the awaiting-ack flag for `addr`. A late ack for an address
    /// that was already removed is a no-op.
    pub fn ack_received(&self, addr: PeerAddr) {
        if let Some(record) = self.players.lock().unwrap().get_mut(&addr) {
            record.awaiting_ack = false;
        }
    }

    /// Removes every peer still awaiting an ack and returns their addresses.
    pub fn sweep_unacked(&self) -> Vec<PeerAddr> {
        let stale: Vec<PeerAddr> = {
            let players = self.players.lock().unwrap();
            players
                .iter()
                .filter(|(_, record)| record.awaiting_ack)
                .map(|(addr, _)| *addr)
                .collect()
        };
        for addr in &stale {
            self.remove(*addr);
        }
        stale
    }

    // ── Pending outbound invitation ───────────────────────────────────────────

    /// The uuid of the peer we currently have an invitation out to.
    pub fn pending_invite(&self) -> Option<Uuid> {
        *self.invitation.lock().unwrap()
    }

    pub fn set_pending_invite(&self, uuid: Uuid) {
        *self.invitation.lock().unwrap() = Some(uuid);
    }

    /// Clears the pending invitation. Safe to call when none is pending.
    pub fn clear_pending_invite(&self) {
        *self.invitation.lock().unwrap() = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> PeerAddr {
        format!("192.168.1.20:{port}").parse().unwrap()
    }

    fn update_name(name: &str) -> PlayerUpdate {
        PlayerUpdate {
            player_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_upsert_reports_first_sighting() {
        let registry = PeerRegistry::new();
        assert!(registry.upsert(addr(10035), &update_name("Alice")));
        assert!(!registry.upsert(addr(10035), &update_name("Alice")));
    }

    #[test]
    fn test_upsert_merges_disjoint_field_subsets() {
        // Arrange: three partial updates with disjoint fields
        let registry = PeerRegistry::new();
        let uuid = Uuid::new_v4();
        let a = PlayerUpdate {
            player_uuid: Some(uuid),
            ..Default::default()
        };
        let b = update_name("Alice");
        let c = PlayerUpdate {
            player_color: Some(Color::White),
            ..Default::default()
        };

        // Act: apply in one order to one address, reversed to another
        registry.upsert(addr(1), &a);
        registry.upsert(addr(1), &b);
        registry.upsert(addr(1), &c);
        registry.upsert(addr(2), &c);
        registry.upsert(addr(2), &b);
        registry.upsert(addr(2), &a);

        // Assert: both records equal the field-wise union
        let expected = PlayerRecord {
            uuid: Some(uuid),
            name: Some("Alice".to_string()),
            color: Some(Color::White),
            inviting: false,
            awaiting_ack: false,
        };
        assert_eq!(registry.get(addr(1)), Some(expected.clone()));
        assert_eq!(registry.get(addr(2)), Some(expected));
    }

    #[test]
    fn test_upsert_never_resets_unspecified_fields() {
        let registry = PeerRegistry::new();
        registry.upsert(
            addr(1),
            &PlayerUpdate {
                player_uuid: Some(Uuid::new_v4()),
                player_color: Some(Color::Black),
                ..Default::default()
            },
        );

        // A later name-only update must leave uuid and color intact.
        registry.upsert(addr(1), &update_name("Renamed"));
        let record = registry.get(addr(1)).unwrap();
        assert!(record.uuid.is_some());
        assert_eq!(record.color, Some(Color::Black));
        assert_eq!(record.name.as_deref(), Some("Renamed"));
    }

    #[test]
    fn test_game_fields_are_tracked_separately() {
        let registry = PeerRegistry::new();
        let game_uuid = Uuid::new_v4();
        registry.upsert(
            addr(1),
            &PlayerUpdate {
                game_uuid: Some(game_uuid),
                game_name: Some("lunch break".to_string()),
                ..Default::default()
            },
        );

        let games = registry.games();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].1.uuid, Some(game_uuid));
        assert_eq!(games[0].1.name.as_deref(), Some("lunch break"));
    }

    #[test]
    fn test_remove_clears_player_and_game() {
        let registry = PeerRegistry::new();
        registry.upsert(
            addr(1),
            &PlayerUpdate {
                player_name: Some("Alice".to_string()),
                game_name: Some("game".to_string()),
                ..Default::default()
            },
        );

        assert!(registry.remove(addr(1)));
        assert!(registry.get(addr(1)).is_none());
        assert!(registry.games().is_empty());
        // Removing again is a no-op.
        assert!(!registry.remove(addr(1)));
    }

    #[test]
    fn test_find_by_uuid() {
        let registry = PeerRegistry::new();
        let uuid = Uuid::new_v4();
        registry.upsert(
            addr(7),
            &PlayerUpdate {
                player_uuid: Some(uuid),
                ..Default::default()
            },
        );

        let (found_addr, record) = registry.find_by_uuid(uuid).unwrap();
        assert_eq!(found_addr, addr(7));
        assert_eq!(record.uuid, Some(uuid));
        assert!(registry.find_by_uuid(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_ack_sweep_removes_only_silent_peers() {
        // Arrange: two peers, both marked awaiting
        let registry = PeerRegistry::new();
        registry.upsert(addr(1), &update_name("Alice"));
        registry.upsert(addr(2), &update_name("Bob"));
        let marked = registry.mark_all_awaiting_ack();
        assert_eq!(marked.len(), 2);

        // Act: only peer 1 answers
        registry.ack_received(addr(1));
        let stale = registry.sweep_unacked();

        // Assert
        assert_eq!(stale, vec![addr(2)]);
        assert!(registry.get(addr(1)).is_some());
        assert!(registry.get(addr(2)).is_none());
    }

    #[test]
    fn test_late_ack_for_removed_peer_is_noop() {
        let registry = PeerRegistry::new();
        registry.ack_received(addr(9));
        assert!(registry.get(addr(9)).is_none());
    }

    #[test]
    fn test_pending_invite_clear_is_idempotent() {
        let registry = PeerRegistry::new();
        assert_eq!(registry.pending_invite(), None);

        // Clearing with nothing pending never errors and never changes state.
        registry.clear_pending_invite();
        registry.clear_pending_invite();
        assert_eq!(registry.pending_invite(), None);

        let uuid = Uuid::new_v4();
        registry.set_pending_invite(uuid);
        assert_eq!(registry.pending_invite(), Some(uuid));
        registry.clear_pending_invite();
        assert_eq!(registry.pending_invite(), None);
    }
}
