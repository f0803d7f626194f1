//! UDP broadcast-based peer discovery and invitation handshake.
//!
//! On start the service binds a UDP socket, broadcasts the full local
//! characteristic set (player uuid/name/color, game uuid/name) to the
//! broadcast address of every active non-loopback interface (or to a
//! configured override list), and spawns a receive loop on a dedicated
//! thread so synchronous socket I/O never blocks the caller.
//!
//! One long-lived socket handles both sending and receiving. Peers send
//! from their bound port, so the source address of an inbound datagram is
//! exactly where replies must go; that address is also the registry key.
//!
//! The receive loop answers the first sighting of a peer with a unicast
//! copy of our own full characteristics, so two freshly-started instances
//! converge on each other within a single broadcast round.
//!
//! Liveness is opt-in: while the keepalive flag is set, a timer thread
//! probes every known peer each `keepalive_period` and removes the ones
//! that stay silent past `ack_timeout`. The flag is off by default so the
//! LAN is not flooded once both sides have moved to the relay phase.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use lanchess_core::domain::Color;
use lanchess_core::protocol::{decode_frame, encode_frame, Frame, FrameError, PlayerUpdate};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DiscoveryConfig;
use crate::registry::{PeerAddr, PeerRegistry};

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A socket option could not be applied.
    #[error("failed to configure discovery socket: {0}")]
    Socket(#[source] std::io::Error),

    /// The OS refused a send to a broadcast address. The service cannot
    /// function without outbound discovery, so this is fatal to the caller.
    #[error("broadcast to {addr} failed: {source}")]
    Broadcast {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A unicast send to a known peer failed.
    #[error("send to peer {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// An outbound frame could not be encoded.
    #[error(transparent)]
    Encode(#[from] FrameError),

    /// No known peer carries this uuid.
    #[error("unknown peer: {0}")]
    UnknownPeer(Uuid),

    /// The target declared the same color as the local player.
    #[error("peer {0} shares the local color; cannot invite")]
    ColorConflict(Uuid),

    /// An invitation to another peer is already outstanding.
    #[error("an invitation to peer {0} is already pending")]
    InvitePending(Uuid),

    /// Accept/decline was called for a peer that never invited us.
    #[error("peer {0} has no pending invitation toward us")]
    NoPendingInvitation(Uuid),
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A previously unknown peer announced itself.
    PeerDiscovered { addr: PeerAddr },
    /// A known peer changed some of its characteristics.
    PeerUpdated { addr: PeerAddr },
    /// A peer quit or stopped answering keepalives; its records are gone.
    PeerLost { addr: PeerAddr },
    /// A peer invited the local player to a game.
    InviteReceived {
        addr: PeerAddr,
        player_uuid: Option<Uuid>,
    },
    /// The peer we invited turned us down; the pending invitation is
    /// cleared.
    InviteDeclined { addr: PeerAddr },
    /// The handshake concluded; both sides move to the relay phase and
    /// this service shuts down its loops.
    GameStarting { addr: PeerAddr },
}

/// The local process's own announced characteristics.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub player_uuid: Uuid,
    pub player_name: String,
    pub player_color: Color,
    pub game_uuid: Uuid,
    pub game_name: String,
}

impl LocalIdentity {
    /// The complete characteristic set, as broadcast at startup and sent to
    /// every newly sighted peer.
    pub fn full_update(&self) -> PlayerUpdate {
        PlayerUpdate {
            player_uuid: Some(self.player_uuid),
            player_name: Some(self.player_name.clone()),
            player_color: Some(self.player_color),
            game_uuid: Some(self.game_uuid),
            game_name: Some(self.game_name.clone()),
            inviting: None,
        }
    }

    /// Merges the fields present in `update` into the local identity.
    /// The player uuid is stable and never rewritten.
    fn apply(&mut self, update: &PlayerUpdate) {
        if let Some(name) = &update.player_name {
            self.player_name = name.clone();
        }
        if let Some(color) = update.player_color {
            self.player_color = color;
        }
        if let Some(uuid) = update.game_uuid {
            self.game_uuid = uuid;
        }
        if let Some(name) = &update.game_name {
            self.game_name = name.clone();
        }
    }
}

struct Inner {
    socket: UdpSocket,
    registry: Arc<PeerRegistry>,
    identity: Mutex<LocalIdentity>,
    /// Stable copy of the local player uuid, usable without the identity
    /// lock.
    local_uuid: Uuid,
    /// Port remote instances listen on; broadcasts target it.
    peer_port: u16,
    broadcast_addrs: Vec<Ipv4Addr>,
    keepalive_period: Duration,
    ack_timeout: Duration,
    running: AtomicBool,
    keepalive_enabled: AtomicBool,
    events: mpsc::Sender<DiscoveryEvent>,
}

/// The discovery actor: receive loop, liveness timer, and the public
/// invitation handshake.
pub struct DiscoveryService {
    inner: Arc<Inner>,
    recv_handle: Option<std::thread::JoinHandle<()>>,
    keepalive_handle: Option<std::thread::JoinHandle<()>>,
}

impl DiscoveryService {
    /// Binds the discovery socket, broadcasts the local characteristics,
    /// and spawns the receive and liveness threads.
    ///
    /// Returns the service handle plus the receiver for
    /// [`DiscoveryEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::BindFailed`] when the socket cannot be
    /// bound and [`DiscoveryError::Broadcast`] when the startup
    /// announcement cannot be sent; without it no peer would learn we
    /// exist.
    pub fn start(
        config: &DiscoveryConfig,
        identity: LocalIdentity,
        registry: Arc<PeerRegistry>,
    ) -> Result<(Self, mpsc::Receiver<DiscoveryEvent>), DiscoveryError> {
        let bind_addr: SocketAddr =
            (Ipv4Addr::UNSPECIFIED, config.effective_bind_port()).into();
        let socket = UdpSocket::bind(bind_addr).map_err(|source| DiscoveryError::BindFailed {
            addr: bind_addr,
            source,
        })?;
        socket.set_broadcast(true).map_err(DiscoveryError::Socket)?;
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .map_err(DiscoveryError::Socket)?;

        let broadcast_addrs = if config.broadcast_addrs.is_empty() {
            interface_broadcast_addrs()
        } else {
            config.broadcast_addrs.clone()
        };

        let (tx, rx) = mpsc::channel(64);
        let local_uuid = identity.player_uuid;
        let inner = Arc::new(Inner {
            socket,
            registry,
            identity: Mutex::new(identity),
            local_uuid,
            peer_port: config.port,
            broadcast_addrs,
            keepalive_period: config.keepalive_period(),
            ack_timeout: config.ack_timeout(),
            running: AtomicBool::new(true),
            keepalive_enabled: AtomicBool::new(false),
            events: tx,
        });

        let local_addr = inner.socket.local_addr().map_err(DiscoveryError::Socket)?;

        // Announce ourselves before the loops start; datagrams arriving in
        // the meantime queue in the socket buffer.
        inner.broadcast_characteristics()?;

        let recv_inner = Arc::clone(&inner);
        let recv_handle = std::thread::Builder::new()
            .name("discovery-recv".to_string())
            .spawn(move || recv_loop(recv_inner))
            .expect("failed to spawn discovery receive thread");

        let keepalive_inner = Arc::clone(&inner);
        let keepalive_handle = std::thread::Builder::new()
            .name("discovery-keepalive".to_string())
            .spawn(move || keepalive_loop(keepalive_inner))
            .expect("failed to spawn discovery keepalive thread");

        info!(
            "discovery service on UDP {local_addr} targeting peer port {}",
            inner.peer_port
        );
        Ok((
            Self {
                inner,
                recv_handle: Some(recv_handle),
                keepalive_handle: Some(keepalive_handle),
            },
            rx,
        ))
    }

    /// The address the discovery socket is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.socket.local_addr()
    }

    /// Whether the loops are still running. Turns false after [`stop`],
    /// after an ACCEPT/GAMEISREADY concluded the handshake, or after
    /// [`accept`] was called.
    ///
    /// [`stop`]: DiscoveryService::stop
    /// [`accept`]: DiscoveryService::accept
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    /// Enables or disables the periodic keepalive sweep.
    pub fn set_keepalive_enabled(&self, enabled: bool) {
        self.inner.keepalive_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Broadcasts the full local characteristic set.
    pub fn broadcast_characteristics(&self) -> Result<(), DiscoveryError> {
        self.inner.broadcast_characteristics()
    }

    /// Applies `update` to the local identity and unicasts just those
    /// changed fields to every known peer, avoiding full resends.
    pub fn send_update(&self, update: PlayerUpdate) -> Result<(), DiscoveryError> {
        self.inner.identity.lock().unwrap().apply(&update);
        let frame = Frame::LanPlayer(update);
        for (addr, _) in self.inner.registry.all() {
            self.inner.send_frame(&frame, addr)?;
        }
        Ok(())
    }

    // ── Invitation handshake ──────────────────────────────────────────────────

    /// Invites the peer identified by `uuid` to a game.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::UnknownPeer`] when no registered peer carries the
    /// uuid, [`DiscoveryError::ColorConflict`] when the target declared the
    /// local color, and [`DiscoveryError::InvitePending`] while an
    /// invitation to a different peer is outstanding. None of these mutate
    /// the invitation state.
    pub fn invite(&self, uuid: Uuid) -> Result<(), DiscoveryError> {
        let (addr, record) = self
            .inner
            .registry
            .find_by_uuid(uuid)
            .ok_or(DiscoveryError::UnknownPeer(uuid))?;

        let local_color = self.inner.identity.lock().unwrap().player_color;
        if record.color == Some(local_color) {
            return Err(DiscoveryError::ColorConflict(uuid));
        }
        if let Some(pending) = self.inner.registry.pending_invite() {
            if pending != uuid {
                return Err(DiscoveryError::InvitePending(pending));
            }
        }

        self.inner.send_frame(&self.inviting_update(true), addr)?;
        self.inner.registry.set_pending_invite(uuid);
        info!("invited peer {uuid} at {addr}");
        Ok(())
    }

    /// Cancels an outbound invitation. Idempotent: cancelling a peer that
    /// was never invited, or cancelling repeatedly, clears the local state
    /// and succeeds either way.
    pub fn cancel_invite(&self, uuid: Uuid) -> Result<(), DiscoveryError> {
        self.inner.registry.clear_pending_invite();
        if let Some((addr, _)) = self.inner.registry.find_by_uuid(uuid) {
            self.inner.send_frame(&self.inviting_update(false), addr)?;
        }
        Ok(())
    }

    /// Accepts an invitation previously received from `uuid` and winds the
    /// discovery phase down; the relay phase takes over.
    pub fn accept(&self, uuid: Uuid) -> Result<(), DiscoveryError> {
        let addr = self.addr_of_inviter(uuid)?;
        self.inner.send_frame(&Frame::Accept, addr)?;
        info!("accepted invitation from {uuid}; leaving discovery phase");
        let _ = self
            .inner
            .events
            .try_send(DiscoveryEvent::GameStarting { addr });
        self.inner.running.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Declines an invitation previously received from `uuid`.
    pub fn decline(&self, uuid: Uuid) -> Result<(), DiscoveryError> {
        let addr = self.addr_of_inviter(uuid)?;
        self.inner.send_frame(&Frame::Decline, addr)?;
        // The peer is no longer inviting us.
        self.inner.registry.upsert(
            addr,
            &PlayerUpdate {
                inviting: Some(false),
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Tells the peer identified by `uuid` that our relay side is up and
    /// accepting connections.
    pub fn announce_game_ready(&self, uuid: Uuid) -> Result<(), DiscoveryError> {
        let (addr, _) = self
            .inner
            .registry
            .find_by_uuid(uuid)
            .ok_or(DiscoveryError::UnknownPeer(uuid))?;
        self.inner.send_frame(&Frame::GameIsReady, addr)
    }

    /// Tells every known peer we are leaving the LAN.
    pub fn announce_quit(&self) -> Result<(), DiscoveryError> {
        for (addr, _) in self.inner.registry.all() {
            self.inner.send_frame(&Frame::Quit, addr)?;
        }
        Ok(())
    }

    /// Stops the loops, closes down the timers, and joins the threads.
    /// Idempotent and safe to call from a thread other than the loops'.
    pub fn stop(&mut self) {
        self.inner.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.recv_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.keepalive_handle.take() {
            let _ = handle.join();
        }
    }

    fn inviting_update(&self, inviting: bool) -> Frame {
        Frame::LanPlayer(PlayerUpdate {
            player_uuid: Some(self.inner.local_uuid),
            inviting: Some(inviting),
            ..Default::default()
        })
    }

    /// Resolves `uuid` to an address, requiring an inbound invitation from
    /// that peer to be on record.
    fn addr_of_inviter(&self, uuid: Uuid) -> Result<PeerAddr, DiscoveryError> {
        let (addr, record) = self
            .inner
            .registry
            .find_by_uuid(uuid)
            .ok_or(DiscoveryError::UnknownPeer(uuid))?;
        if !record.inviting {
            return Err(DiscoveryError::NoPendingInvitation(uuid));
        }
        Ok(addr)
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn broadcast_characteristics(&self) -> Result<(), DiscoveryError> {
        let update = self.identity.lock().unwrap().full_update();
        let bytes = encode_frame(&Frame::LanPlayer(update))?;
        for broadcast in &self.broadcast_addrs {
            let dest = SocketAddr::V4(SocketAddrV4::new(*broadcast, self.peer_port));
            self.socket
                .send_to(&bytes, dest)
                .map_err(|source| DiscoveryError::Broadcast { addr: dest, source })?;
        }
        debug!("broadcast local characteristics to {} address(es)", self.broadcast_addrs.len());
        Ok(())
    }

    fn send_frame(&self, frame: &Frame, dest: PeerAddr) -> Result<(), DiscoveryError> {
        let bytes = encode_frame(frame)?;
        self.socket
            .send_to(&bytes, dest)
            .map(|_| ())
            .map_err(|source| DiscoveryError::Send { addr: dest, source })
    }

    /// Emits an event from the receive thread, stopping the loop when the
    /// receiver is gone.
    fn emit(&self, event: DiscoveryEvent) -> bool {
        self.events.blocking_send(event).is_ok()
    }
}

// ── Receive loop ──────────────────────────────────────────────────────────────

fn recv_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; 4096];

    while inner.running.load(Ordering::Relaxed) {
        let (len, src) = match inner.socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                warn!("discovery recv error: {e}");
                continue;
            }
        };

        match decode_frame(&buf[..len]) {
            Ok(frame) => {
                if !handle_datagram(&inner, frame, src) {
                    break;
                }
            }
            Err(e) => {
                // Malformed frame from an untrusted peer: drop it, keep going.
                debug!("undecodable discovery datagram from {src}: {e}");
            }
        }
    }

    info!("discovery receive loop stopped");
}

/// Dispatches one inbound frame. Returns `false` when the loop must end.
fn handle_datagram(inner: &Inner, frame: Frame, src: PeerAddr) -> bool {
    match frame {
        Frame::LanPlayer(update) => handle_player_update(inner, update, src),
        Frame::Keepalive => {
            if let Err(e) = inner.send_frame(&Frame::Ack, src) {
                warn!("failed to ack keepalive from {src}: {e}");
            }
            true
        }
        Frame::Ack => {
            inner.registry.ack_received(src);
            true
        }
        Frame::Accept | Frame::GameIsReady => {
            info!("handshake concluded by {src}; leaving discovery phase");
            inner.running.store(false, Ordering::Relaxed);
            let _ = inner.emit(DiscoveryEvent::GameStarting { addr: src });
            false
        }
        Frame::Decline => {
            let their_uuid = inner.registry.get(src).and_then(|r| r.uuid);
            match (inner.registry.pending_invite(), their_uuid) {
                (Some(pending), Some(their)) if pending == their => {
                    inner.registry.clear_pending_invite();
                    info!("peer {their} declined our invitation");
                    inner.emit(DiscoveryEvent::InviteDeclined { addr: src })
                }
                _ => {
                    debug!("stray decline from {src} ignored");
                    true
                }
            }
        }
        Frame::Quit => {
            if inner.registry.remove(src) {
                info!("peer {src} quit");
                return inner.emit(DiscoveryEvent::PeerLost { addr: src });
            }
            true
        }
        other => {
            debug!(
                "unexpected frame on discovery channel from {src}: {:?}",
                other.opcode()
            );
            true
        }
    }
}

fn handle_player_update(inner: &Inner, update: PlayerUpdate, src: PeerAddr) -> bool {
    let inviting = update.inviting == Some(true);
    let their_uuid = update.player_uuid;
    let first_sighting = inner.registry.upsert(src, &update);

    if first_sighting {
        debug!("first sighting of peer {src}; replying with our characteristics");
        // Handshake symmetry: answer directly so two freshly-started peers
        // converge without a third broadcast round.
        let reply = Frame::LanPlayer(inner.identity.lock().unwrap().full_update());
        if let Err(e) = inner.send_frame(&reply, src) {
            warn!("failed to answer first sighting of {src}: {e}");
        }
        if !inner.emit(DiscoveryEvent::PeerDiscovered { addr: src }) {
            return false;
        }
    } else if !inner.emit(DiscoveryEvent::PeerUpdated { addr: src }) {
        return false;
    }

    if inviting {
        let their = their_uuid.or_else(|| inner.registry.get(src).and_then(|r| r.uuid));
        if mutual_invite_suppressed(inner.local_uuid, inner.registry.pending_invite(), their) {
            debug!("mutual invitation with {src}; ours stands (lower uuid)");
            return true;
        }
        // If they invited us back while ours was pending toward them, their
        // lower uuid wins and supersedes our invitation.
        if inner.registry.pending_invite().is_some() && inner.registry.pending_invite() == their {
            inner.registry.clear_pending_invite();
        }
        return inner.emit(DiscoveryEvent::InviteReceived {
            addr: src,
            player_uuid: their,
        });
    }
    true
}

/// Tie-break for two peers inviting each other simultaneously: the lower
/// player uuid's invitation stands and the other side's is dropped.
fn mutual_invite_suppressed(
    local_uuid: Uuid,
    pending: Option<Uuid>,
    their_uuid: Option<Uuid>,
) -> bool {
    matches!((pending, their_uuid), (Some(pending), Some(their)) if pending == their && local_uuid < their)
}

// ── Keepalive loop ────────────────────────────────────────────────────────────

fn keepalive_loop(inner: Arc<Inner>) {
    loop {
        if !sleep_while_running(&inner, inner.keepalive_period) {
            break;
        }
        if !inner.keepalive_enabled.load(Ordering::Relaxed) {
            continue;
        }

        // Arm every peer, probe them, then come back after the ack window.
        let probed = inner.registry.mark_all_awaiting_ack();
        for addr in &probed {
            if let Err(e) = inner.send_frame(&Frame::Keepalive, *addr) {
                warn!("keepalive to {addr} failed: {e}");
            }
        }
        if probed.is_empty() {
            continue;
        }

        if !sleep_while_running(&inner, inner.ack_timeout) {
            break;
        }
        // The deferred check: peers whose entry was removed by other means
        // in the meantime are simply absent here.
        for addr in inner.registry.sweep_unacked() {
            info!("peer {addr} missed its keepalive ack; removed");
            let _ = inner.events.blocking_send(DiscoveryEvent::PeerLost { addr });
        }
    }

    info!("discovery keepalive loop stopped");
}

/// Sleeps for `total` in short slices, returning `false` as soon as the
/// service stops running.
fn sleep_while_running(inner: &Inner, total: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while !remaining.is_zero() {
        if !inner.running.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    inner.running.load(Ordering::Relaxed)
}

/// Broadcast addresses of every active non-loopback IPv4 interface.
///
/// Falls back to the limited broadcast address when enumeration fails or no
/// interface advertises one, so announcements are never silently skipped.
fn interface_broadcast_addrs() -> Vec<Ipv4Addr> {
    let mut addrs: Vec<Ipv4Addr> = Vec::new();
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for iface in interfaces {
                if iface.is_loopback() {
                    continue;
                }
                if let if_addrs::IfAddr::V4(v4) = iface.addr {
                    if let Some(broadcast) = v4.broadcast {
                        if !addrs.contains(&broadcast) {
                            addrs.push(broadcast);
                        }
                    }
                }
            }
        }
        Err(e) => warn!("network interface enumeration failed: {e}"),
    }
    if addrs.is_empty() {
        addrs.push(Ipv4Addr::BROADCAST);
    }
    addrs
}

/// Returns `true` for OS timeout / would-block errors that should be
/// retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(color: Color) -> LocalIdentity {
        LocalIdentity {
            player_uuid: Uuid::new_v4(),
            player_name: "local".to_string(),
            player_color: color,
            game_uuid: Uuid::new_v4(),
            game_name: "local game".to_string(),
        }
    }

    #[test]
    fn test_full_update_carries_every_field() {
        let id = identity(Color::White);
        let update = id.full_update();
        assert_eq!(update.player_uuid, Some(id.player_uuid));
        assert_eq!(update.player_name.as_deref(), Some("local"));
        assert_eq!(update.player_color, Some(Color::White));
        assert_eq!(update.game_uuid, Some(id.game_uuid));
        assert_eq!(update.game_name.as_deref(), Some("local game"));
        assert_eq!(update.inviting, None);
    }

    #[test]
    fn test_identity_apply_merges_only_present_fields() {
        let mut id = identity(Color::White);
        let original_uuid = id.player_uuid;

        id.apply(&PlayerUpdate {
            player_name: Some("renamed".to_string()),
            player_color: Some(Color::Black),
            ..Default::default()
        });

        assert_eq!(id.player_name, "renamed");
        assert_eq!(id.player_color, Color::Black);
        assert_eq!(id.player_uuid, original_uuid, "uuid is stable");
        assert_eq!(id.game_name, "local game", "unmentioned field untouched");
    }

    #[test]
    fn test_mutual_invite_lower_uuid_wins() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);

        // We are `low` with an invitation pending toward `high`; their
        // counter-invitation is suppressed.
        assert!(mutual_invite_suppressed(low, Some(high), Some(high)));
        // We are `high`; the counter-invitation from `low` supersedes ours.
        assert!(!mutual_invite_suppressed(high, Some(low), Some(low)));
        // No pending invitation: nothing to suppress.
        assert!(!mutual_invite_suppressed(low, None, Some(high)));
        // Pending toward someone else entirely.
        assert!(!mutual_invite_suppressed(
            low,
            Some(Uuid::from_u128(9)),
            Some(high)
        ));
    }

    #[test]
    fn test_interface_broadcast_addrs_excludes_loopback_and_never_empties() {
        let addrs = interface_broadcast_addrs();
        assert!(!addrs.is_empty(), "fallback guarantees at least one target");
        assert!(!addrs.contains(&Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_is_timeout_error_classification() {
        assert!(is_timeout_error(&std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "wb"
        )));
        assert!(is_timeout_error(&std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "to"
        )));
        assert!(!is_timeout_error(&std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "cr"
        )));
    }

    #[test]
    fn test_start_binds_and_stop_is_idempotent() {
        // Arrange: an OS-assigned bind port and loopback "broadcast" so the
        // test never leaves the machine. Nothing listens on the peer port;
        // UDP sends to a silent port still succeed.
        let config = DiscoveryConfig {
            port: 45999,
            bind_port: Some(0),
            broadcast_addrs: vec![Ipv4Addr::LOCALHOST],
            keepalive_period_secs: 0.2,
            ack_timeout_secs: 0.1,
        };
        let registry = Arc::new(PeerRegistry::new());

        // Act
        let (mut service, _events) =
            DiscoveryService::start(&config, identity(Color::White), registry)
                .expect("must bind on an ephemeral port");
        assert!(service.is_running());

        // Assert: stopping twice is safe
        service.stop();
        assert!(!service.is_running());
        service.stop();
    }
}
