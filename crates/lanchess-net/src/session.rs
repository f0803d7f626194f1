//! Client facade for one relayed game session.
//!
//! Wraps a single TCP connection to a relay host. Every outbound operation
//! follows the same contract:
//!
//! 1. Send the frame, retrying transient failures up to three times with a
//!    short delay. Exhausting the retries is a [`SessionError::Bottleneck`],
//!    and the facade stays connected.
//! 2. A hard failure (broken pipe, reset, timeout, any other OS error)
//!    disconnects the facade before the error is returned; every later call
//!    then fails fast with [`SessionError::NotConnected`] without touching
//!    the socket.
//! 3. On success, read exactly one reply frame and map SUCCESSFUL /
//!    UNSUCCESSFUL / UNREACHABLE to the operation's outcome.
//!
//! A background task sends KEEPALIVE frames at 0.75 × the read timeout for
//! the lifetime of the connection and stops on its own once the facade is
//! disconnected.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use lanchess_core::domain::{Color, DrawClaim};
use lanchess_core::protocol::{
    encode_frame, ClaimMsg, Frame, GameFullMsg, GameJoinMsg, MoveMsg, WithdrawalMsg,
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::framing::{read_frame, FramingError};

/// One initial send plus three retries.
const MAX_SEND_ATTEMPTS: usize = 4;
/// Pause between transient-failure retries.
const RETRY_DELAY: Duration = Duration::from_millis(100);
/// Keepalive interval as a fraction of the read timeout.
const KEEPALIVE_FACTOR: f64 = 0.75;

/// Error type for session client operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The TCP connection to the relay host could not be established.
    #[error("failed to connect to relay host {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The facade is not connected; no I/O was attempted.
    #[error("not connected to a relay host")]
    NotConnected,

    /// Transient send failures exhausted the retry budget. The connection
    /// is still up; the caller may try again later.
    #[error("send bottleneck: {MAX_SEND_ATTEMPTS} attempts failed transiently")]
    Bottleneck,

    /// A hard connectivity failure; the facade has disconnected itself.
    #[error("connection to relay host lost: {0}")]
    Disconnected(#[source] std::io::Error),

    /// The relay host rejected the request (UNSUCCESSFUL).
    #[error("request rejected by relay host")]
    Rejected,

    /// The request was valid but the opponent's connection is gone
    /// (UNREACHABLE).
    #[error("opponent unreachable")]
    OpponentUnreachable,

    /// The peer violated the protocol (unexpected or malformed frame).
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// What the opponent did, as observed after our own move was acknowledged
/// or while waiting on [`SessionClient::wait_opponent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpponentEvent {
    /// The opponent played this move token.
    Move(String),
    /// The opponent claimed a draw with this token.
    Claim(String),
    /// The opponent withdrew; the game is over.
    Withdrawal,
}

/// The joined peer's view of one relayed game.
///
/// One task drives the facade at a time; replies and opponent frames share
/// the single reader, so interleaving calls from several tasks would race
/// for each other's frames (see [`SessionClient::wait_opponent`]).
pub struct SessionClient {
    player_uuid: Uuid,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    connected: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl SessionClient {
    /// Connects to the relay host and starts the keepalive task.
    ///
    /// `read_timeout` bounds how long a request waits for its reply frame;
    /// the keepalive interval is derived from it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectFailed`] when the TCP connection
    /// cannot be established.
    pub async fn connect(
        addr: SocketAddr,
        player_uuid: Uuid,
        read_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SessionError::ConnectFailed { addr, source })?;
        let (read_half, write_half) = stream.into_split();

        let writer = Arc::new(Mutex::new(Some(write_half)));
        let connected = Arc::new(AtomicBool::new(true));
        info!("session connected to relay host {addr}");

        spawn_keepalive_task(
            Arc::clone(&writer),
            Arc::clone(&connected),
            read_timeout.mul_f64(KEEPALIVE_FACTOR),
        );

        Ok(Self {
            player_uuid,
            reader: Mutex::new(Some(read_half)),
            writer,
            connected,
            read_timeout,
        })
    }

    /// Whether the facade still considers itself connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Closes the connection and stops the keepalive task. Idempotent.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.writer.lock().await.take();
        self.reader.lock().await.take();
    }

    // ── Game lifecycle ────────────────────────────────────────────────────────

    /// Announces a new game to the relay host.
    pub async fn create_game(&self, uuid: Uuid, name: &str) -> Result<(), SessionError> {
        let frame = Frame::GameFull(GameFullMsg {
            uuid,
            name: name.to_string(),
        });
        ack_of(self.request(&frame).await?)
    }

    /// Removes a game from the relay host.
    pub async fn delete_game(&self, uuid: Uuid) -> Result<(), SessionError> {
        ack_of(self.request(&Frame::GameDelete(uuid)).await?)
    }

    /// Takes the given seat in an existing game.
    pub async fn join_game(
        &self,
        game_uuid: Uuid,
        color: Color,
        player_name: &str,
    ) -> Result<(), SessionError> {
        let frame = Frame::GameJoin(GameJoinMsg {
            game_uuid,
            player_color: color,
            player_name: player_name.to_string(),
            player_uuid: self.player_uuid,
        });
        ack_of(self.request(&frame).await?)
    }

    // ── In-game traffic ───────────────────────────────────────────────────────

    /// Sends a move token.
    ///
    /// With `wait_for_reply` set, blocks after the acknowledgement for
    /// exactly one more frame and returns the opponent's move, claim, or
    /// withdrawal. With it unset, returns immediately after the ack.
    pub async fn send_move(
        &self,
        mv: &str,
        wait_for_reply: bool,
    ) -> Result<Option<OpponentEvent>, SessionError> {
        let frame = Frame::Move(MoveMsg {
            player_uuid: self.player_uuid,
            mv: mv.to_string(),
        });
        ack_of(self.request(&frame).await?)?;

        if wait_for_reply {
            Ok(Some(self.wait_opponent().await?))
        } else {
            Ok(None)
        }
    }

    /// Sends a draw claim.
    pub async fn send_claim(&self, claim: DrawClaim) -> Result<(), SessionError> {
        let frame = Frame::Claim(ClaimMsg {
            player_uuid: self.player_uuid,
            claim: claim.as_token().to_string(),
        });
        ack_of(self.request(&frame).await?)
    }

    /// Withdraws from the game.
    pub async fn send_withdrawal(&self) -> Result<(), SessionError> {
        let frame = Frame::Withdrawal(WithdrawalMsg {
            player_uuid: self.player_uuid,
        });
        ack_of(self.request(&frame).await?)
    }

    /// Blocks for the next frame forwarded from the opponent.
    ///
    /// There is deliberately no timeout here: the opponent's thinking time
    /// is unbounded. Callers who need a bound can wrap this in their own
    /// timeout and disconnect on expiry.
    ///
    /// The facade expects a single driving task. A request issued from
    /// another task while this call is parked either blocks behind the
    /// reader lock or has its acknowledgement frame consumed here and
    /// misread as an opponent frame.
    pub async fn wait_opponent(&self) -> Result<OpponentEvent, SessionError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(SessionError::NotConnected)?;

        match read_frame(reader).await {
            Ok(Frame::Move(msg)) => Ok(OpponentEvent::Move(msg.mv)),
            Ok(Frame::Claim(msg)) => Ok(OpponentEvent::Claim(msg.claim)),
            Ok(Frame::Withdrawal(_)) => Ok(OpponentEvent::Withdrawal),
            Ok(other) => Err(SessionError::Protocol(format!(
                "expected opponent move/claim/withdrawal, got {:?}",
                other.opcode()
            ))),
            Err(FramingError::Io(e)) => {
                drop(guard);
                self.disconnect().await;
                Err(SessionError::Disconnected(e))
            }
            Err(other) => Err(SessionError::Protocol(other.to_string())),
        }
    }

    // ── Request/reply plumbing ────────────────────────────────────────────────

    /// Sends one frame and reads exactly one reply frame.
    async fn request(&self, frame: &Frame) -> Result<Frame, SessionError> {
        let wire = frame_to_wire(frame)?;

        {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(SessionError::NotConnected)?;
            if let Err(e) = send_with_retry(writer, &wire, &self.connected).await {
                if matches!(e, SessionError::Disconnected(_)) {
                    guard.take();
                    drop(guard);
                    self.disconnect().await;
                    warn!("hard send failure, session disconnected: {e}");
                }
                return Err(e);
            }
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(SessionError::NotConnected)?;
        match timeout(self.read_timeout, read_frame(reader)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(FramingError::Io(e))) => {
                drop(guard);
                self.disconnect().await;
                Err(SessionError::Disconnected(e))
            }
            Ok(Err(other)) => Err(SessionError::Protocol(other.to_string())),
            Err(_elapsed) => {
                drop(guard);
                self.disconnect().await;
                Err(SessionError::Disconnected(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "no reply from relay host within the read timeout",
                )))
            }
        }
    }
}

/// Maps a reply frame to the operation outcome.
fn ack_of(reply: Frame) -> Result<(), SessionError> {
    match reply {
        Frame::Successful => Ok(()),
        Frame::Unsuccessful => Err(SessionError::Rejected),
        Frame::Unreachable => Err(SessionError::OpponentUnreachable),
        other => Err(SessionError::Protocol(format!(
            "expected a reply opcode, got {:?}",
            other.opcode()
        ))),
    }
}

/// Serializes a frame with its length prefix, ready for a single write.
fn frame_to_wire(frame: &Frame) -> Result<Vec<u8>, SessionError> {
    let body = encode_frame(frame).map_err(|e| SessionError::Protocol(e.to_string()))?;
    let mut wire = Vec::with_capacity(4 + body.len());
    wire.extend_from_slice(&(body.len() as u32).to_be_bytes());
    wire.extend_from_slice(&body);
    Ok(wire)
}

// ── Send retry loop ───────────────────────────────────────────────────────────

/// Writes `wire` with bounded retries on transient failures.
///
/// A hard failure clears `connected` before [`SessionError::Disconnected`]
/// is returned; running out of retries is a [`SessionError::Bottleneck`] and
/// leaves the flag alone.
async fn send_with_retry<W>(
    writer: &mut W,
    wire: &[u8],
    connected: &AtomicBool,
) -> Result<(), SessionError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    for attempt in 1..=MAX_SEND_ATTEMPTS {
        let result = async {
            writer.write_all(wire).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) => {
                debug!("transient send failure (attempt {attempt}/{MAX_SEND_ATTEMPTS}): {e}");
                if attempt < MAX_SEND_ATTEMPTS {
                    sleep(RETRY_DELAY).await;
                }
            }
            Err(e) => {
                connected.store(false, Ordering::Relaxed);
                return Err(SessionError::Disconnected(e));
            }
        }
    }
    Err(SessionError::Bottleneck)
}

/// Backpressure-like conditions worth retrying; everything else is hard.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}

// ── Keepalive ─────────────────────────────────────────────────────────────────

/// Sends KEEPALIVE frames at `interval` until the session disconnects.
fn spawn_keepalive_task(
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    connected: Arc<AtomicBool>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let wire = match frame_to_wire(&Frame::Keepalive) {
            Ok(wire) => wire,
            Err(e) => {
                warn!("keepalive task could not encode its frame: {e}");
                return;
            }
        };

        loop {
            sleep(interval).await;
            if !connected.load(Ordering::Relaxed) {
                break;
            }

            let mut guard = writer.lock().await;
            let Some(w) = guard.as_mut() else { break };
            let result = async {
                w.write_all(&wire).await?;
                w.flush().await
            }
            .await;
            if let Err(e) = result {
                debug!("keepalive send failed, stopping: {e}");
                guard.take();
                connected.store(false, Ordering::Relaxed);
                break;
            }
        }
        debug!("keepalive task stopped");
    });
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        // Lets the keepalive task notice it should stop.
        self.connected.store(false, Ordering::Relaxed);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn transient_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::WouldBlock, "buffer full")
    }

    // `tokio_test::io::Mock` uses `WouldBlock` internally to signal "waiting
    // for the next scheduled action" and panics if a queued error has that
    // kind, so mock-injected transient errors use `Interrupted` instead.
    fn mockable_transient_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr")
    }

    #[test]
    fn test_is_transient_classification() {
        assert!(is_transient(&transient_err()));
        assert!(is_transient(&std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "eintr"
        )));
        assert!(!is_transient(&std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "gone"
        )));
        assert!(!is_transient(&std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_succeeds_after_transient_failures() {
        // Arrange: two transient failures, then the write goes through.
        let wire = frame_to_wire(&Frame::Keepalive).unwrap();
        let connected = AtomicBool::new(true);
        let mut mock = tokio_test::io::Builder::new()
            .write_error(mockable_transient_err())
            .write_error(mockable_transient_err())
            .write(&wire)
            .build();

        // Act / Assert
        assert!(send_with_retry(&mut mock, &wire, &connected).await.is_ok());
        assert!(connected.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausting_retry_budget_is_a_bottleneck() {
        // Four consecutive transient failures exceed the budget of three
        // retries.
        let wire = frame_to_wire(&Frame::Keepalive).unwrap();
        let connected = AtomicBool::new(true);
        let mut mock = tokio_test::io::Builder::new()
            .write_error(mockable_transient_err())
            .write_error(mockable_transient_err())
            .write_error(mockable_transient_err())
            .write_error(mockable_transient_err())
            .build();

        let result = send_with_retry(&mut mock, &wire, &connected).await;
        assert!(matches!(result, Err(SessionError::Bottleneck)));
        assert!(
            connected.load(Ordering::Relaxed),
            "a bottleneck must leave the session connected"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_pipe_is_a_hard_failure_immediately() {
        let wire = frame_to_wire(&Frame::Keepalive).unwrap();
        let connected = AtomicBool::new(true);
        let mut mock = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer gone",
            ))
            .build();

        match send_with_retry(&mut mock, &wire, &connected).await {
            Err(SessionError::Disconnected(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe)
            }
            other => panic!("expected Disconnected(BrokenPipe), got {other:?}"),
        }
        assert!(
            !connected.load(Ordering::Relaxed),
            "a hard failure must clear the connected flag"
        );
    }

    #[test]
    fn test_ack_mapping() {
        assert!(ack_of(Frame::Successful).is_ok());
        assert!(matches!(
            ack_of(Frame::Unsuccessful),
            Err(SessionError::Rejected)
        ));
        assert!(matches!(
            ack_of(Frame::Unreachable),
            Err(SessionError::OpponentUnreachable)
        ));
        assert!(matches!(
            ack_of(Frame::Keepalive),
            Err(SessionError::Protocol(_))
        ));
    }

    #[test]
    fn test_frame_to_wire_prefixes_length() {
        let wire = frame_to_wire(&Frame::Successful).unwrap();
        assert_eq!(wire.len(), 5);
        assert_eq!(u32::from_be_bytes(wire[..4].try_into().unwrap()), 1);
    }
}
