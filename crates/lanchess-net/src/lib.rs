//! lanchess-net: the networking subsystem.
//!
//! Four components, leaves first:
//!
//! - [`registry`] — thread-safe table of remote players and advertised games,
//!   keyed by network address.
//! - [`discovery`] — UDP broadcast actor: announces the local player,
//!   tracks peer liveness, and drives the invite/accept/decline handshake.
//! - [`relay`] — TCP relay host: accepts two seats per game and forwards
//!   moves, claims, and withdrawals between them.
//! - [`session`] — the client side of a relayed game: create/join/delete a
//!   game, send moves, and keep the connection alive.
//!
//! Re-exports the public surface so integration tests in `tests/` and the
//! embedding application share the same module tree.

pub mod config;
pub mod discovery;
pub mod framing;
pub mod registry;
pub mod relay;
pub mod session;

pub use config::{DiscoveryConfig, NetworkConfig, RelayConfig};
pub use discovery::{DiscoveryError, DiscoveryEvent, DiscoveryService, LocalIdentity};
pub use registry::{PeerAddr, PeerRegistry, PlayerRecord};
pub use relay::{RelayError, RelayServer};
pub use session::{OpponentEvent, SessionClient, SessionError};
