//! Step Session
//!
//! Owns the step source and the daily aggregator for one user session and
//! runs them as a single consumer task:
//!
//! ```text
//! MotionSensor ──mpsc──▶ StepSource ──▶ StepSession ──▶ DailyStepAggregator ──▶ StepStore
//!                                          ▲
//!                 SessionHandle ──commands─┘ (reset, snapshot, history)
//! ```
//!
//! The session task is the only writer of the counter. Everything else
//! talks to it through a [`SessionHandle`], whose requests are answered over
//! `oneshot` channels.
//!
//! On cancellation or source EOF the session releases the motion
//! subscription, performs a final flush and syncs the store.

use crate::aggregator::{AggregatorStats, DailyStepAggregator};
use crate::acquisition::MotionSensor;
use crate::clock::Clock;
use crate::config::defaults::COMMAND_CHANNEL_CAPACITY;
use crate::config::StepConfig;
use crate::detector::DetectorStats;
use crate::history::{HistoryError, HistoryQuery, HistoryWindow};
use crate::source::{select_source, SourceMode, SourceSelection, StepSource, StepSourceEvent};
use crate::storage::StepStore;
use crate::types::DailyTotal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("step session is closed")]
    Closed,
}

/// Point-in-time view of a running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub today: DailyTotal,
    pub mode: SourceMode,
    /// Some steps have not been stored yet.
    pub unflushed: bool,
}

/// Final statistics returned by [`StepSession::run`].
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub user_id: String,
    pub source: String,
    pub mode: SourceMode,
    pub today: DailyTotal,
    pub detector: Option<DetectorStats>,
    pub aggregator: AggregatorStats,
    pub final_flush_ok: bool,
}

/// Requests routed to the session task.
#[derive(Debug)]
pub enum SessionCommand {
    Reset {
        reply: oneshot::Sender<DailyTotal>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    History {
        window: HistoryWindow,
        reply: oneshot::Sender<Result<Vec<DailyTotal>, HistoryError>>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable front end of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Set today's count to 0. The new value is stored immediately; a
    /// failed write is retried by the session and not reported here.
    pub async fn reset(&self) -> Result<DailyTotal, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Reset { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Gap-filled daily totals, with today's entry taken from the live counter.
    pub async fn history(&self, window: HistoryWindow) -> Result<Vec<DailyTotal>, HistoryError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::History { window, reply })
            .await
            .map_err(|_| HistoryError::SessionClosed)?;
        rx.await.map_err(|_| HistoryError::SessionClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session-scoped owner of the step counter.
pub struct StepSession {
    source: Box<dyn StepSource>,
    aggregator: DailyStepAggregator,
    history: HistoryQuery,
    commands: mpsc::Receiver<SessionCommand>,
    flush_interval: Duration,
    notice: Option<String>,
}

/// What woke the session loop.
enum LoopEvent {
    Cancelled,
    Command(SessionCommand),
    CommandsClosed,
    Source(StepSourceEvent),
    SourceFailed(String),
    Tick,
}

impl StepSession {
    /// Probe `sensor`, pick a step source and resume today's stored total.
    pub async fn open(
        user_id: impl Into<String>,
        store: Arc<dyn StepStore>,
        clock: Arc<dyn Clock>,
        sensor: Arc<dyn MotionSensor>,
        config: &StepConfig,
    ) -> (Self, SessionHandle) {
        let selection = select_source(sensor, config);
        Self::with_source(user_id, store, clock, selection, config).await
    }

    /// Build a session around an already selected source.
    pub async fn with_source(
        user_id: impl Into<String>,
        store: Arc<dyn StepStore>,
        clock: Arc<dyn Clock>,
        selection: SourceSelection,
        config: &StepConfig,
    ) -> (Self, SessionHandle) {
        let mut aggregator =
            DailyStepAggregator::new(user_id, store.clone(), clock, &config.aggregator);
        aggregator.hydrate().await;

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let session = Self {
            source: selection.source,
            aggregator,
            history: HistoryQuery::new(store, config.history.max_window_days),
            commands: rx,
            flush_interval: config.aggregator.flush_interval(),
            notice: selection.notice,
        };
        (session, SessionHandle { tx })
    }

    /// The degraded-mode notice, returned at most once.
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    pub fn mode(&self) -> SourceMode {
        self.source.mode()
    }

    /// Run until `cancel` fires or the source ends.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionSummary {
        info!(
            user = %self.aggregator.user_id(),
            source = %self.source.source_name(),
            mode = ?self.source.mode(),
            steps = self.aggregator.count(),
            "[StepSession] Started"
        );

        let mut tick = tokio::time::interval(self.flush_interval.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tick.tick().await;

        let mut commands_open = true;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => LoopEvent::Cancelled,
                command = self.commands.recv(), if commands_open => match command {
                    Some(c) => LoopEvent::Command(c),
                    None => LoopEvent::CommandsClosed,
                },
                result = self.source.next_event() => match result {
                    Ok(ev) => LoopEvent::Source(ev),
                    Err(e) => LoopEvent::SourceFailed(e.to_string()),
                },
                _ = tick.tick() => LoopEvent::Tick,
            };

            match event {
                LoopEvent::Cancelled => {
                    info!("[StepSession] Shutdown signal received");
                    break;
                }
                LoopEvent::Command(command) => self.handle_command(command).await,
                LoopEvent::CommandsClosed => {
                    debug!("[StepSession] All handles dropped");
                    commands_open = false;
                }
                LoopEvent::Source(StepSourceEvent::Step(step)) => {
                    self.aggregator.on_step_event(step);
                    self.aggregator.maybe_flush().await;
                }
                LoopEvent::Source(StepSourceEvent::Synthetic { steps }) => {
                    self.aggregator.on_steps(steps);
                    self.aggregator.maybe_flush().await;
                }
                LoopEvent::Source(StepSourceEvent::Eof) => {
                    info!(
                        "[StepSession] Source '{}' reached end",
                        self.source.source_name()
                    );
                    break;
                }
                LoopEvent::SourceFailed(e) => {
                    warn!("[StepSession] Source error: {}", e);
                    break;
                }
                LoopEvent::Tick => {
                    self.aggregator.maybe_flush().await;
                }
            }
        }

        self.teardown().await
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Reset { reply } => {
                // A failed write is already logged and will be retried.
                let _ = self.aggregator.reset().await;
                let _ = reply.send(self.aggregator.snapshot());
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::History { window, reply } => {
                let _ = reply.send(self.history(window).await);
            }
        }
    }

    fn snapshot(&mut self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.aggregator.user_id().to_string(),
            today: self.aggregator.snapshot(),
            mode: self.source.mode(),
            unflushed: self.aggregator.has_unflushed(),
        }
    }

    async fn history(&mut self, window: HistoryWindow) -> Result<Vec<DailyTotal>, HistoryError> {
        let today = self.aggregator.snapshot();
        let mut series = self
            .history
            .query(self.aggregator.user_id(), window, today.date)
            .await?;

        // Once hydrated the live counter is never behind the stored value
        // for today. Before that it only holds this session's steps.
        if let Some(last) = series.last_mut() {
            if last.date == today.date {
                last.count = if self.aggregator.is_hydrated() {
                    today.count
                } else {
                    last.count.saturating_add(today.count)
                };
            }
        }
        Ok(series)
    }

    async fn teardown(mut self) -> SessionSummary {
        self.source.shutdown().await;
        self.commands.close();

        let final_flush_ok = match self.aggregator.flush().await {
            Ok(steps) => {
                info!(steps, "[StepSession] Final flush complete");
                true
            }
            Err(e) => {
                warn!("[StepSession] Final flush failed, today's latest steps are not stored: {}", e);
                false
            }
        };

        if let Err(e) = self.aggregator.store().sync().await {
            warn!("[StepSession] Store sync failed: {}", e);
        }

        let summary = SessionSummary {
            user_id: self.aggregator.user_id().to_string(),
            source: self.source.source_name().to_string(),
            mode: self.source.mode(),
            today: self.aggregator.snapshot(),
            detector: self.source.detector_stats(),
            aggregator: self.aggregator.stats(),
            final_flush_ok,
        };

        info!(
            user = %summary.user_id,
            date = %summary.today.date,
            steps = summary.today.count,
            flushes = summary.aggregator.flushes,
            failed_flushes = summary.aggregator.failed_flushes,
            "[StepSession] Stopped"
        );
        summary
    }
}
