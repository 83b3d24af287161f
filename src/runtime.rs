//! Per-room event loop and registry housekeeping.
//!
//! [`RoomRuntime`] is a thin handle over a background task that owns one
//! room's [`GameSession`]. Inbound events arrive on an unbounded MPSC
//! channel and are applied strictly in receipt order, so the session has a
//! single logical writer. A 1 Hz interval feeds timer ticks; candidate
//! fetches run as sub-tasks whose completion re-enters the event stream as
//! ordinary events. After every successful mutation the projected views are
//! broadcast through the registry; rejections go back to the offending
//! sender only.

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::RoomConfig;
use crate::content::{fetch_with_retry, ContentSource};
use crate::error::{GameError, Result};
use crate::game::{Effect, GameEvent, GameSession, Phase, Sender};
use crate::protocol::{PlayerId, ServerFrame};
use crate::registry::{Endpoint, SharedRegistry, REAP_INTERVAL};
use crate::view::{project, Recipient};

/// Timeout for the graceful shutdown before the loop task is aborted.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to a spawned room event loop.
///
/// Dropping the handle aborts the loop; prefer [`shutdown`](Self::shutdown)
/// for a graceful exit.
pub struct RoomRuntime {
    event_tx: mpsc::UnboundedSender<GameEvent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RoomRuntime {
    /// Spawn the event loop for a freshly created room.
    ///
    /// The registry entry for `code` should already exist; the loop only
    /// reads it to resolve delivery handles.
    pub fn spawn(
        code: impl Into<String>,
        config: RoomConfig,
        registry: SharedRegistry,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let session = GameSession::new(code, config);

        let task = tokio::spawn(room_loop(
            session,
            registry,
            content,
            event_tx.clone(),
            event_rx,
            shutdown_rx,
        ));

        Self {
            event_tx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Queue an event for the room's single writer.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::RoomClosed`] once the loop has exited.
    pub fn submit(&self, event: GameEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .map_err(|_| GameError::RoomClosed)
    }

    /// Shut the loop down gracefully, aborting it if it does not exit
    /// within the timeout.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("room loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("room loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("room loop aborted: {join_err}");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for RoomRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRuntime")
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RoomRuntime {
    fn drop(&mut self) {
        // No executor is available inside Drop; aborting is the only safe
        // teardown for a still-running loop.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Loop body ───────────────────────────────────────────────────────

async fn room_loop(
    mut session: GameSession,
    registry: SharedRegistry,
    content: Arc<dyn ContentSource>,
    event_tx: mpsc::UnboundedSender<GameEvent>,
    mut event_rx: mpsc::UnboundedReceiver<GameEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(room = %session.room_code(), "room loop started");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!(room = %session.room_code(), "shutdown signal received");
                break;
            }

            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        handle_event(&mut session, &registry, &content, &event_tx, event);
                    }
                    // All senders dropped; nothing can reach this room.
                    None => {
                        debug!(room = %session.room_code(), "event channel closed");
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                let before = signature(&session);
                // Ticks cannot be rejected; a tick with no active timer is
                // a no-op.
                let _ = session.apply(GameEvent::Tick);
                if signature(&session) != before {
                    broadcast(&registry, &session);
                }
            }
        }
    }

    debug!(room = %session.room_code(), "room loop exited");
}

/// Cheap change detector for tick-driven broadcasts.
fn signature(session: &GameSession) -> (Phase, Option<u32>, Option<PlayerId>) {
    (session.phase(), session.timer(), session.current_presenter())
}

fn handle_event(
    session: &mut GameSession,
    registry: &SharedRegistry,
    content: &Arc<dyn ContentSource>,
    event_tx: &mpsc::UnboundedSender<GameEvent>,
    event: GameEvent,
) {
    let sender = event.sender();
    match session.apply(event) {
        Ok(effects) => {
            for effect in effects {
                run_effect(content, event_tx, effect);
            }
            broadcast(registry, session);
        }
        Err(err) => {
            debug!(room = %session.room_code(), %err, "event rejected");
            if let Some(sender) = sender {
                deliver_rejection(registry, session.room_code(), sender, &err);
            }
        }
    }
}

fn run_effect(
    content: &Arc<dyn ContentSource>,
    event_tx: &mpsc::UnboundedSender<GameEvent>,
    effect: Effect,
) {
    match effect {
        Effect::FetchCandidates { player_id, count } => {
            let content = Arc::clone(content);
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                let event = match fetch_with_retry(content.as_ref(), count).await {
                    Some(items) => GameEvent::CandidatesReady { player_id, items },
                    None => GameEvent::CandidatesFailed { player_id },
                };
                // The loop may have exited; a lost completion is harmless.
                let _ = event_tx.send(event);
            });
        }
    }
}

/// Project and deliver one `SYNC_STATE` frame per connected recipient.
fn broadcast(registry: &SharedRegistry, session: &GameSession) {
    let guard = registry.read().unwrap_or_else(PoisonError::into_inner);
    let Some(targets) = guard.broadcast_targets(session.room_code()) else {
        return;
    };
    if let Some(host) = targets.host {
        let view = project(session, Recipient::Host);
        if host.send(ServerFrame::SyncState(Box::new(view))).is_err() {
            debug!(room = %session.room_code(), "host handle closed");
        }
    }
    for (player_id, handle) in targets.players {
        let view = project(session, Recipient::Player(player_id));
        if handle.send(ServerFrame::SyncState(Box::new(view))).is_err() {
            debug!(room = %session.room_code(), %player_id, "player handle closed");
        }
    }
}

fn deliver_rejection(registry: &SharedRegistry, code: &str, sender: Sender, err: &GameError) {
    let endpoint = match sender {
        Sender::Host => Endpoint::Host,
        Sender::Player(id) => Endpoint::Player(id),
    };
    let guard = registry.read().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = guard.handle_for(code, endpoint) {
        let _ = handle.send(ServerFrame::from_error(err));
    }
}

// ── Housekeeping ────────────────────────────────────────────────────

/// Spawn the periodic registry reaper. Abort the returned handle to stop
/// it.
pub fn spawn_reaper(registry: SharedRegistry) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let reaped = registry
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .reap_expired_rooms(Instant::now());
            if reaped > 0 {
                debug!(reaped, "idle rooms reclaimed");
            }
        }
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::content::ContentError;
    use crate::protocol::ContentItem;
    use crate::registry::SessionRegistry;
    use async_trait::async_trait;

    struct StubSource;

    #[async_trait]
    impl ContentSource for StubSource {
        async fn fetch_candidates(
            &self,
            count: usize,
        ) -> std::result::Result<Vec<ContentItem>, ContentError> {
            Ok((0..count)
                .map(|i| ContentItem {
                    id: format!("stub-{i}"),
                    title: format!("Stub Topic {i}"),
                    body: "A stub body. With a second sentence.".into(),
                    source_url: format!("https://example.test/stub/{i}"),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn submit_fails_after_shutdown() {
        let registry = SessionRegistry::new().into_shared();
        let mut runtime = RoomRuntime::spawn(
            "GLXY",
            RoomConfig::default(),
            registry,
            Arc::new(StubSource),
        );
        runtime.shutdown().await;
        let result = runtime.submit(GameEvent::Tick);
        assert!(matches!(result, Err(GameError::RoomClosed)));
    }

    #[tokio::test]
    async fn rejection_reaches_only_the_offending_sender() {
        let registry = SessionRegistry::new().into_shared();
        let code = {
            let mut guard = registry.write().unwrap();
            let (code, _token) = guard.create_room(Instant::now());
            code
        };

        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        registry
            .write()
            .unwrap()
            .attach_socket(&code, Endpoint::Host, host_tx)
            .unwrap();

        let runtime = RoomRuntime::spawn(
            code.clone(),
            RoomConfig::default(),
            Arc::clone(&registry),
            Arc::new(StubSource),
        );

        // A start request with no players is a guard failure.
        runtime
            .submit(GameEvent::StartRequested {
                sender: Sender::Host,
            })
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), host_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, ServerFrame::Error { .. }));
    }

    #[tokio::test]
    async fn successful_events_broadcast_sync_state() {
        let registry = SessionRegistry::new().into_shared();
        let code = {
            let mut guard = registry.write().unwrap();
            guard.create_room(Instant::now()).0
        };
        let (player_id, _token) = registry
            .write()
            .unwrap()
            .add_player(&code, "Ada")
            .unwrap();
        let (player_tx, mut player_rx) = mpsc::unbounded_channel();
        registry
            .write()
            .unwrap()
            .attach_socket(&code, Endpoint::Player(player_id), player_tx)
            .unwrap();

        let runtime = RoomRuntime::spawn(
            code.clone(),
            RoomConfig::default(),
            Arc::clone(&registry),
            Arc::new(StubSource),
        );
        runtime
            .submit(GameEvent::PlayerJoined {
                player_id,
                name: "Ada".into(),
            })
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), player_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let ServerFrame::SyncState(view) = frame else {
            panic!("expected SYNC_STATE, got {frame:?}");
        };
        assert_eq!(view.players.len(), 1);
        assert_eq!(view.players[0].name, "Ada");
    }
}
