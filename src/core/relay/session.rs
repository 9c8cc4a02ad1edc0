//! Relay session lifecycle.
//!
//! A [`RelaySession`] owns both connections of one call. [`RelaySession::run`]
//! negotiates the realtime session, starts one pump per direction, and
//! returns once the first pump stops, after applying the configured
//! [`SiblingPolicy`] to the other.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::base::{CallConnection, Direction, FrameSink, PumpExit};
use super::config::{SessionSettings, SiblingPolicy};
use super::messages::{ClientEvent, SessionConfig};
use super::pumps::{PumpReport, RelayStats, RelayStatsSnapshot, run_ai_pump, run_telephony_pump};
use super::turn::TurnState;

/// How long closing a write half may take before it is abandoned.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// How a session ended.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Direction whose pump stopped first
    pub ended_by: Direction,
    /// Why it stopped
    pub exit: PumpExit,
    /// How the other pump stopped; `None` when it was detached
    pub sibling_exit: Option<PumpExit>,
    /// Counters at the time `run` returned
    pub stats: RelayStatsSnapshot,
    /// The pump still relaying under [`SiblingPolicy::Detach`]
    pub detached: Option<DetachedPump>,
}

/// A pump left running after its session returned.
///
/// The call is still live until [`DetachedPump::wait`] resolves, so whoever
/// accounts for the call should hold on to it until then.
#[derive(Debug)]
pub struct DetachedPump {
    direction: Direction,
    handle: JoinHandle<PumpExit>,
}

impl DetachedPump {
    /// Direction the detached pump relays from.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Wait for the detached pump to stop on its own.
    pub async fn wait(self) -> PumpExit {
        match self.handle.await {
            Ok(exit) => exit,
            Err(e) => PumpExit::TransportFailed(e.to_string()),
        }
    }
}

/// One bridged call between a telephony stream and a realtime endpoint.
pub struct RelaySession {
    telephony: CallConnection,
    ai: CallConnection,
    settings: SessionSettings,
    turn: Arc<TurnState>,
    stats: Arc<RelayStats>,
    negotiation_attempted: bool,
}

impl RelaySession {
    /// Create a session over two established connections.
    pub fn new(telephony: CallConnection, ai: CallConnection, settings: SessionSettings) -> Self {
        Self {
            telephony,
            ai,
            settings,
            turn: Arc::new(TurnState::new()),
            stats: Arc::new(RelayStats::default()),
            negotiation_attempted: false,
        }
    }

    /// Shared turn state, for observing the call from outside the pumps.
    pub fn turn_state(&self) -> Arc<TurnState> {
        self.turn.clone()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Send the `session.update` negotiation to the realtime endpoint.
    ///
    /// Attempted at most once per session; later calls do nothing. A failed
    /// send is logged and the session carries on, so the endpoint keeps its
    /// own defaults. Returns whether the frame was written.
    pub async fn send_initial_negotiation(&mut self) -> bool {
        if self.negotiation_attempted {
            warn!("Session negotiation already sent, ignoring");
            return false;
        }
        self.negotiation_attempted = true;

        let update = ClientEvent::SessionUpdate {
            session: SessionConfig::from_settings(&self.settings),
        };
        let frame = match update.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize session update: {}", e);
                return false;
            }
        };

        info!(
            voice = %self.settings.voice,
            audio_format = %self.settings.audio_format,
            "Sending session update"
        );
        match self.ai.sink.send_frame(frame).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send session update: {}", e);
                false
            }
        }
    }

    /// Relay the call until one direction ends.
    ///
    /// Negotiates first if [`send_initial_negotiation`] has not been called.
    /// With [`SiblingPolicy::Close`] the other pump is cancelled and both
    /// write halves are closed before returning. With
    /// [`SiblingPolicy::Detach`] the other pump keeps running in the
    /// background until its own connection fails.
    ///
    /// [`send_initial_negotiation`]: Self::send_initial_negotiation
    pub async fn run(mut self) -> SessionOutcome {
        if !self.negotiation_attempted {
            self.send_initial_negotiation().await;
        }

        let RelaySession {
            telephony,
            ai,
            settings,
            turn,
            stats,
            ..
        } = self;

        let cancel = CancellationToken::new();
        let span = Span::current();

        let mut telephony_task = tokio::spawn(
            run_telephony_pump(
                telephony.source,
                ai.sink,
                turn.clone(),
                stats.clone(),
                cancel.clone(),
            )
            .instrument(span.clone()),
        );
        let mut ai_task = tokio::spawn(
            run_ai_pump(
                ai.source,
                telephony.sink,
                turn,
                stats.clone(),
                cancel.clone(),
            )
            .instrument(span.clone()),
        );

        let (ended_by, joined) = tokio::select! {
            joined = &mut telephony_task => (Direction::Telephony, joined),
            joined = &mut ai_task => (Direction::Ai, joined),
        };
        let (sibling, sibling_direction) = match ended_by {
            Direction::Telephony => (ai_task, Direction::Ai),
            Direction::Ai => (telephony_task, Direction::Telephony),
        };

        let (exit, first_sink) = unpack(joined);
        info!(direction = %ended_by, reason = %exit, "Relay direction ended");

        let (sibling_exit, detached) = match settings.sibling_policy {
            SiblingPolicy::Close => {
                cancel.cancel();
                let (sibling_exit, sibling_sink) = unpack(sibling.await);
                close_sink(first_sink).await;
                close_sink(sibling_sink).await;
                info!(reason = %sibling_exit, "Relay session closed");
                (Some(sibling_exit), None)
            }
            SiblingPolicy::Detach => {
                drop(first_sink);
                let handle = tokio::spawn(watch_detached(sibling).instrument(span));
                let detached = DetachedPump {
                    direction: sibling_direction,
                    handle,
                };
                (None, Some(detached))
            }
        };

        SessionOutcome {
            ended_by,
            exit,
            sibling_exit,
            stats: stats.snapshot(),
            detached,
        }
    }
}

fn unpack(joined: Result<PumpReport, JoinError>) -> (PumpExit, Option<Box<dyn FrameSink>>) {
    match joined {
        Ok(report) => (report.exit, Some(report.sink)),
        Err(e) => {
            error!("Relay pump task failed: {}", e);
            (PumpExit::TransportFailed(e.to_string()), None)
        }
    }
}

async fn close_sink(sink: Option<Box<dyn FrameSink>>) {
    if let Some(mut sink) = sink {
        match tokio::time::timeout(SINK_CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Closing connection after session end failed: {}", e),
            Err(_) => warn!("Closing connection timed out, dropping it"),
        }
    }
}

async fn watch_detached(sibling: JoinHandle<PumpReport>) -> PumpExit {
    let (exit, _sink) = unpack(sibling.await);
    info!(reason = %exit, "Detached relay direction ended");
    exit
}
