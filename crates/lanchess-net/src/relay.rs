//! TCP relay host for two-player game sessions.
//!
//! Once discovery has matched two peers, one side starts a [`RelayServer`]
//! and both sides connect to it as clients. The host keeps a small table of
//! games; each game has a white and a black seat, and a seat binds a player
//! identity to the TCP connection it joined from. MOVE, CLAIM, and
//! WITHDRAWAL frames are forwarded from one seat's connection to the other,
//! with the sender told SUCCESSFUL, UNSUCCESSFUL, or UNREACHABLE depending
//! on whether the opponent could be reached.
//!
//! The relay never inspects move or claim tokens; legality is the caller's
//! concern.
//!
//! All game-table mutation happens under a single lock. Contention is low:
//! a host serves at most a handful of concurrent games.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use lanchess_core::domain::Color;
use lanchess_core::protocol::{Frame, GameFullMsg, GameJoinMsg};
use thiserror::Error;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::framing::{read_frame, write_frame, FramingError};

/// Error type for relay server operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The TCP listener could not be bound.
    #[error("failed to bind relay listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Write half of one client connection, shared between that connection's
/// reply path and any task relaying frames toward it.
type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// One color slot within a relayed game.
///
/// The identity outlives the connection: when a forwarding write fails the
/// writer is cleared but name and uuid stay, so the player can be told who
/// went missing and a rejoin can restore the seat.
#[derive(Debug, Clone)]
struct PlayerSeat {
    name: String,
    uuid: Uuid,
    writer: Option<SharedWriter>,
}

/// One active game on the host.
#[derive(Debug, Clone)]
struct GameRecord {
    name: String,
    white: Option<PlayerSeat>,
    black: Option<PlayerSeat>,
}

impl GameRecord {
    fn seat(&self, color: Color) -> &Option<PlayerSeat> {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    fn seat_mut(&mut self, color: Color) -> &mut Option<PlayerSeat> {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    /// The color whose seat holds `uuid`, if either does.
    fn color_of(&self, uuid: Uuid) -> Option<Color> {
        for color in [Color::White, Color::Black] {
            if self.seat(color).as_ref().is_some_and(|s| s.uuid == uuid) {
                return Some(color);
            }
        }
        None
    }
}

type GameTable = Mutex<HashMap<Uuid, GameRecord>>;

/// The relay host: an accept loop plus the shared game table.
pub struct RelayServer {
    games: Arc<GameTable>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    accept_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RelayServer {
    /// Binds the relay listener on `0.0.0.0:port` and starts accepting
    /// connections. Pass port 0 to let the OS choose (useful in tests);
    /// the effective address is available via [`RelayServer::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::BindFailed`] if the listener cannot be bound.
    pub async fn start(port: u16) -> Result<Self, RelayError> {
        let addr: SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::BindFailed { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::BindFailed { addr, source })?;

        let games: Arc<GameTable> = Arc::new(Mutex::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));

        let accept_games = Arc::clone(&games);
        let accept_running = Arc::clone(&running);
        let accept_handle = tokio::spawn(async move {
            accept_loop(listener, accept_games, accept_running).await;
        });

        info!("relay server listening on TCP {local_addr}");
        Ok(Self {
            games,
            running,
            local_addr,
            accept_handle: Some(accept_handle),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of active games as (uuid, name) pairs.
    pub fn games(&self) -> Vec<(Uuid, String)> {
        self.games
            .lock()
            .unwrap()
            .iter()
            .map(|(uuid, record)| (*uuid, record.name.clone()))
            .collect()
    }

    /// Stops the accept loop. Idempotent; safe to call from any task.
    /// Connection tasks end when their streams close, which is the relay's
    /// disconnect signal.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, games: Arc<GameTable>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("relay accept loop stopping");
            break;
        }

        // Short timeout so the loop can observe the running flag even when
        // no clients are connecting.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("relay connection from {peer}");
                let games = Arc::clone(&games);
                tokio::spawn(async move {
                    handle_connection(stream, peer, games).await;
                });
            }
            Ok(Err(e)) => {
                warn!("relay accept error: {e}");
            }
            Err(_) => {
                // No connection within the timeout; re-check the flag.
            }
        }
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(stream: TcpStream, peer: SocketAddr, games: Arc<GameTable>) {
    let (mut reader, write_half) = stream.into_split();
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(write_half));

    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => {
                if let Err(e) = dispatch(frame, peer, &writer, &games).await {
                    debug!("relay connection {peer} closed while replying: {e}");
                    break;
                }
            }
            Err(FramingError::Codec(e)) => {
                // Protocol violation from an untrusted peer: drop the frame,
                // keep the connection.
                warn!("malformed relay frame from {peer}: {e}");
            }
            Err(FramingError::FrameTooLarge(len)) => {
                // The stream cannot be resynchronized after this.
                warn!("oversized relay frame ({len} bytes) from {peer}; closing");
                break;
            }
            Err(FramingError::Io(e)) => {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    debug!("relay connection {peer} closed");
                } else {
                    warn!("relay read error from {peer}: {e}");
                }
                break;
            }
        }
    }

    release_seats(&games, &writer);
}

/// Handles one inbound frame, writing any reply back to `writer`.
///
/// Returns an error only when the reply could not be written, meaning this
/// connection is gone.
async fn dispatch(
    frame: Frame,
    peer: SocketAddr,
    writer: &SharedWriter,
    games: &GameTable,
) -> Result<(), FramingError> {
    let reply = match frame {
        Frame::GameFull(msg) => Some(create_game(games, msg)),
        Frame::GameDelete(uuid) => Some(delete_game(games, uuid)),
        Frame::GameJoin(msg) => Some(join_game(games, msg, writer)),
        Frame::Move(msg) => {
            let sender = msg.player_uuid;
            Some(forward(games, sender, Frame::Move(msg)).await)
        }
        Frame::Claim(msg) => {
            let sender = msg.player_uuid;
            Some(forward(games, sender, Frame::Claim(msg)).await)
        }
        Frame::Withdrawal(msg) => {
            let sender = msg.player_uuid;
            Some(forward(games, sender, Frame::Withdrawal(msg)).await)
        }
        Frame::Keepalive => {
            // Liveness at this layer is carried by the stream itself; the
            // probe only warrants a trace.
            debug!("relay keepalive from {peer}");
            None
        }
        other => {
            debug!("unexpected frame on relay channel from {peer}: {:?}", other.opcode());
            None
        }
    };

    if let Some(reply) = reply {
        write_frame(&mut *writer.lock().await, &reply).await?;
    }
    Ok(())
}

// ── Game lifecycle ────────────────────────────────────────────────────────────

fn create_game(games: &GameTable, msg: GameFullMsg) -> Frame {
    let mut table = games.lock().unwrap();
    if table.contains_key(&msg.uuid) {
        // Duplicate creation is rejected and must not touch the existing
        // record.
        warn!("game {} already exists; rejecting duplicate creation", msg.uuid);
        return Frame::Unsuccessful;
    }
    info!("game {} ({:?}) created", msg.uuid, msg.name);
    table.insert(
        msg.uuid,
        GameRecord {
            name: msg.name,
            white: None,
            black: None,
        },
    );
    Frame::Successful
}

fn delete_game(games: &GameTable, uuid: Uuid) -> Frame {
    if games.lock().unwrap().remove(&uuid).is_some() {
        info!("game {uuid} deleted");
        Frame::Successful
    } else {
        Frame::Unsuccessful
    }
}

fn join_game(games: &GameTable, msg: GameJoinMsg, writer: &SharedWriter) -> Frame {
    let mut table = games.lock().unwrap();
    let Some(game) = table.get_mut(&msg.game_uuid) else {
        return Frame::Unsuccessful;
    };

    let seat = game.seat_mut(msg.player_color);
    if let Some(prev) = seat {
        // Last writer wins; the previous occupant keeps no claim to the seat.
        warn!(
            "seat {} of game {} was held by {} ({}); overwriting with {} ({})",
            msg.player_color, msg.game_uuid, prev.name, prev.uuid, msg.player_name, msg.player_uuid
        );
    }
    *seat = Some(PlayerSeat {
        name: msg.player_name,
        uuid: msg.player_uuid,
        writer: Some(Arc::clone(writer)),
    });
    info!(
        "{} joined game {} as {}",
        msg.player_uuid, msg.game_uuid, msg.player_color
    );
    Frame::Successful
}

// ── Forwarding ────────────────────────────────────────────────────────────────

/// Forwards `frame` from the seat holding `sender` to the opposite seat.
///
/// Returns the reply owed to the sender: UNSUCCESSFUL when no game seats the
/// sender, UNREACHABLE when the opponent has no live connection (including
/// when the forwarding write just failed), SUCCESSFUL otherwise.
async fn forward(games: &GameTable, sender: Uuid, frame: Frame) -> Frame {
    // Resolve the opponent's writer under the lock, then write outside it.
    let (game_uuid, opponent_color, opponent_writer) = {
        let table = games.lock().unwrap();
        let Some((game_uuid, game, sender_color)) = table
            .iter()
            .find_map(|(uuid, game)| game.color_of(sender).map(|c| (*uuid, game, c)))
        else {
            debug!("{:?} from {sender} matches no seated game", frame.opcode());
            return Frame::Unsuccessful;
        };

        let opponent_color = sender_color.opposite();
        let writer = game
            .seat(opponent_color)
            .as_ref()
            .and_then(|seat| seat.writer.clone());
        (game_uuid, opponent_color, writer)
    };

    let Some(opponent_writer) = opponent_writer else {
        return Frame::Unreachable;
    };

    let result = match write_frame(&mut *opponent_writer.lock().await, &frame).await {
        Ok(()) => Frame::Successful,
        Err(e) => {
            warn!(
                "forwarding {:?} in game {game_uuid} failed: {e}; marking {opponent_color} seat dead",
                frame.opcode()
            );
            clear_seat_writer(games, game_uuid, opponent_color);
            Frame::Unreachable
        }
    };
    result
}

/// Clears the writer of one seat, keeping the seat identity.
fn clear_seat_writer(games: &GameTable, game_uuid: Uuid, color: Color) {
    let mut table = games.lock().unwrap();
    if let Some(seat) = table
        .get_mut(&game_uuid)
        .and_then(|game| game.seat_mut(color).as_mut())
    {
        seat.writer = None;
    }
}

/// Clears every seat writer bound to `writer` after its connection ended.
fn release_seats(games: &GameTable, writer: &SharedWriter) {
    let mut table = games.lock().unwrap();
    for (uuid, game) in table.iter_mut() {
        for color in [Color::White, Color::Black] {
            if let Some(seat) = game.seat_mut(color).as_mut() {
                if seat
                    .writer
                    .as_ref()
                    .is_some_and(|w| Arc::ptr_eq(w, writer))
                {
                    debug!("releasing {color} seat of game {uuid}");
                    seat.writer = None;
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
