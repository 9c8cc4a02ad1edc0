//! The two message pumps of a relay session.
//!
//! Each pump reads one connection and writes the other:
//!
//! - the telephony pump reads caller frames and writes to the realtime endpoint
//! - the AI pump reads realtime events and writes to the telephony stream
//!
//! A pump runs until its source closes or fails, a write fails, or the session
//! cancels it. Cancellation also interrupts a frame that is still being
//! handled. Frames that decode badly are logged and skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{Direction, FrameSink, FrameSource, PumpExit, RelayError, RelayResult};
use super::messages::{ClientEvent, ServerEvent, TelephonyEvent, TelephonyOutbound};
use super::turn::TurnState;

// =============================================================================
// Stats
// =============================================================================

/// Counters shared by both pumps of a session.
#[derive(Debug, Default)]
pub struct RelayStats {
    audio_appended: AtomicU64,
    audio_forwarded: AtomicU64,
    interruptions: AtomicU64,
    frames_skipped: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    /// Caller audio fragments appended to the realtime input buffer
    pub audio_appended: u64,
    /// Assistant audio fragments sent to telephony
    pub audio_forwarded: u64,
    /// Responses cancelled by barge-in
    pub interruptions: u64,
    /// Inbound frames or outbound sends dropped as malformed
    pub frames_skipped: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            audio_appended: self.audio_appended.load(Ordering::Relaxed),
            audio_forwarded: self.audio_forwarded.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
        }
    }

    fn record_skip(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Pump loop
// =============================================================================

/// What a finished pump hands back to the session.
pub(crate) struct PumpReport {
    pub exit: PumpExit,
    pub sink: Box<dyn FrameSink>,
}

/// Shared read loop. Frames from `direction`'s connection are handled and
/// written to `sink`; a fatal handling error ends the loop, others skip the
/// frame.
async fn pump_loop(
    direction: Direction,
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    turn: &TurnState,
    stats: &RelayStats,
    cancel: &CancellationToken,
) -> PumpExit {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("{} pump cancelled", direction);
                return PumpExit::Cancelled;
            }
            frame = source.next_frame() => frame,
        };

        let text = match frame {
            Ok(Some(text)) => text,
            Ok(None) => {
                info!("{} connection closed", direction);
                return PumpExit::PeerClosed;
            }
            Err(e) => {
                error!("Error reading from {} connection: {}", direction, e);
                return PumpExit::TransportFailed(e.to_string());
            }
        };

        // A write to a stalled peer must not outlive cancellation.
        let handled = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("{} pump cancelled while handling a frame", direction);
                return PumpExit::Cancelled;
            }
            handled = handle_frame(direction, &text, sink, turn, stats) => handled,
        };

        if let Err(e) = handled {
            if e.is_fatal() {
                error!("Error relaying {} frame: {}", direction, e);
                return PumpExit::TransportFailed(e.to_string());
            }
            warn!("Skipping {} frame: {}", direction, e);
            stats.record_skip();
        }
    }
}

async fn handle_frame(
    direction: Direction,
    text: &str,
    sink: &mut dyn FrameSink,
    turn: &TurnState,
    stats: &RelayStats,
) -> RelayResult<()> {
    match direction {
        Direction::Telephony => handle_telephony_frame(text, sink, turn, stats).await,
        Direction::Ai => handle_ai_frame(text, sink, turn, stats).await,
    }
}

// =============================================================================
// Telephony → AI
// =============================================================================

/// Process one frame from the telephony side.
pub(crate) async fn handle_telephony_frame(
    text: &str,
    ai_sink: &mut dyn FrameSink,
    turn: &TurnState,
    stats: &RelayStats,
) -> RelayResult<()> {
    match TelephonyEvent::decode(text)? {
        TelephonyEvent::Start { stream_sid } => {
            info!(stream_sid = %stream_sid, "Incoming stream has started");
            if let Some(previous) = turn.set_stream_sid(stream_sid).await {
                warn!(previous = %previous, "Stream identifier replaced by a later start event");
            }
        }

        TelephonyEvent::Media { payload } => {
            match ClientEvent::audio_append(payload).encode() {
                Ok(frame) => {
                    ai_sink.send_frame(frame).await?;
                    stats.audio_appended.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Failed to serialize input_audio_buffer.append: {}", e);
                    stats.record_skip();
                }
            }

            // Barge-in: caller audio while the assistant is talking cancels
            // the response so it can listen again.
            let interrupted = turn
                .try_interrupt(move || async move {
                    match ClientEvent::ResponseCancel.encode() {
                        Ok(frame) => ai_sink.send_frame(frame).await,
                        Err(e) => {
                            warn!("Failed to serialize response.cancel: {}", e);
                            Ok::<(), RelayError>(())
                        }
                    }
                })
                .await?;

            if interrupted {
                stats.interruptions.fetch_add(1, Ordering::Relaxed);
                info!("Sent response.cancel to realtime endpoint");
            }
        }

        TelephonyEvent::Unrecognized { event } => {
            debug!("Received non-media event from telephony: {}", event);
        }
    }
    Ok(())
}

/// Telephony pump: runs until the telephony connection ends or the session
/// cancels it, then hands back the AI write half.
pub(crate) async fn run_telephony_pump(
    mut source: Box<dyn FrameSource>,
    mut ai_sink: Box<dyn FrameSink>,
    turn: Arc<TurnState>,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) -> PumpReport {
    let exit = pump_loop(
        Direction::Telephony,
        source.as_mut(),
        ai_sink.as_mut(),
        &turn,
        &stats,
        &cancel,
    )
    .await;
    PumpReport {
        exit,
        sink: ai_sink,
    }
}

// =============================================================================
// AI → Telephony
// =============================================================================

/// Process one event from the realtime endpoint.
pub(crate) async fn handle_ai_frame(
    text: &str,
    telephony_sink: &mut dyn FrameSink,
    turn: &TurnState,
    stats: &RelayStats,
) -> RelayResult<()> {
    match ServerEvent::decode(text)? {
        ServerEvent::ResponseStarted => {
            if turn.begin_response().await {
                debug!("Response started");
            } else {
                debug!("Response start while already responding, ignoring");
            }
        }

        ServerEvent::ResponseDone => {
            if turn.end_response().await {
                debug!("Response done");
            } else {
                debug!("Response done while idle, ignoring");
            }
        }

        ServerEvent::AudioDelta { delta } => {
            if delta.is_empty() {
                return Ok(());
            }
            let stream_sid = turn.stream_sid().await;
            match TelephonyOutbound::media(stream_sid, delta).encode() {
                Ok(frame) => {
                    telephony_sink.send_frame(frame).await?;
                    stats.audio_forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Failed to serialize audio delta: {}", e);
                    stats.record_skip();
                }
            }
        }

        ServerEvent::Error { error } => {
            error!(
                "Realtime endpoint error: {} - {}",
                error.error_type, error.message
            );
        }

        ServerEvent::SessionCreated { session_id } => {
            info!(
                session_id = session_id.as_deref().unwrap_or(""),
                "Realtime session created"
            );
        }

        ServerEvent::SessionUpdated => {
            debug!("Realtime session configuration applied");
        }

        ServerEvent::Unrecognized { event_type } => {
            debug!("Received event from realtime endpoint: {}", event_type);
        }
    }
    Ok(())
}

/// AI pump: runs until the realtime connection ends or the session cancels
/// it, then hands back the telephony write half.
pub(crate) async fn run_ai_pump(
    mut source: Box<dyn FrameSource>,
    mut telephony_sink: Box<dyn FrameSink>,
    turn: Arc<TurnState>,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) -> PumpReport {
    let exit = pump_loop(
        Direction::Ai,
        source.as_mut(),
        telephony_sink.as_mut(),
        &turn,
        &stats,
        &cancel,
    )
    .await;
    PumpReport {
        exit,
        sink: telephony_sink,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::relay::transport::{StalledSink, memory_connection};
    use crate::core::relay::turn::TurnPhase;

    #[tokio::test]
    async fn test_media_while_idle_appends_only() {
        let (mut ai, mut ai_peer) = memory_connection();
        let turn = TurnState::new();
        let stats = RelayStats::default();

        handle_telephony_frame(
            r#"{"event":"media","media":{"payload":"aaaa"}}"#,
            ai.sink.as_mut(),
            &turn,
            &stats,
        )
        .await
        .unwrap();

        assert_eq!(
            ai_peer.try_recv().as_deref(),
            Some(r#"{"type":"input_audio_buffer.append","audio":"aaaa"}"#)
        );
        assert_eq!(ai_peer.try_recv(), None);
        assert_eq!(stats.snapshot().audio_appended, 1);
        assert_eq!(stats.snapshot().interruptions, 0);
    }

    #[tokio::test]
    async fn test_media_while_responding_cancels_once() {
        let (mut ai, mut ai_peer) = memory_connection();
        let turn = TurnState::new();
        let stats = RelayStats::default();
        turn.begin_response().await;

        for payload in ["bbbb", "cccc"] {
            let frame = format!(r#"{{"event":"media","media":{{"payload":"{payload}"}}}}"#);
            handle_telephony_frame(&frame, ai.sink.as_mut(), &turn, &stats)
                .await
                .unwrap();
        }

        assert_eq!(
            ai_peer.try_recv().as_deref(),
            Some(r#"{"type":"input_audio_buffer.append","audio":"bbbb"}"#)
        );
        assert_eq!(ai_peer.try_recv().as_deref(), Some(r#"{"type":"response.cancel"}"#));
        assert_eq!(
            ai_peer.try_recv().as_deref(),
            Some(r#"{"type":"input_audio_buffer.append","audio":"cccc"}"#)
        );
        assert_eq!(ai_peer.try_recv(), None);
        assert_eq!(turn.phase().await, TurnPhase::Idle);
        assert_eq!(stats.snapshot().interruptions, 1);
    }

    #[tokio::test]
    async fn test_malformed_telephony_frame_is_not_fatal() {
        let (mut ai, mut ai_peer) = memory_connection();
        let turn = TurnState::new();
        let stats = RelayStats::default();

        let err = handle_telephony_frame(
            r#"{"event":"media","media":{"track":"inbound"}}"#,
            ai.sink.as_mut(),
            &turn,
            &stats,
        )
        .await
        .unwrap_err();

        assert!(!err.is_fatal());
        assert_eq!(ai_peer.try_recv(), None);
    }

    #[tokio::test]
    async fn test_start_records_stream_sid() {
        let (mut ai, _ai_peer) = memory_connection();
        let turn = TurnState::new();
        let stats = RelayStats::default();

        handle_telephony_frame(
            r#"{"event":"start","start":{"streamSid":"S1"}}"#,
            ai.sink.as_mut(),
            &turn,
            &stats,
        )
        .await
        .unwrap();
        assert_eq!(turn.stream_sid().await, "S1");
    }

    #[tokio::test]
    async fn test_audio_delta_tagged_with_stream_sid() {
        let (mut telephony, mut telephony_peer) = memory_connection();
        let turn = TurnState::new();
        let stats = RelayStats::default();
        turn.set_stream_sid("S1".to_string()).await;

        handle_ai_frame(
            r#"{"type":"response.audio.delta","delta":"xyz"}"#,
            telephony.sink.as_mut(),
            &turn,
            &stats,
        )
        .await
        .unwrap();

        assert_eq!(
            telephony_peer.try_recv().as_deref(),
            Some(r#"{"event":"media","streamSid":"S1","media":{"payload":"xyz"}}"#)
        );
    }

    #[tokio::test]
    async fn test_audio_delta_before_start_has_empty_tag() {
        let (mut telephony, mut telephony_peer) = memory_connection();
        let turn = TurnState::new();
        let stats = RelayStats::default();

        handle_ai_frame(
            r#"{"type":"response.audio.delta","delta":"xyz"}"#,
            telephony.sink.as_mut(),
            &turn,
            &stats,
        )
        .await
        .unwrap();

        assert_eq!(
            telephony_peer.try_recv().as_deref(),
            Some(r#"{"event":"media","streamSid":"","media":{"payload":"xyz"}}"#)
        );
    }

    #[tokio::test]
    async fn test_empty_audio_delta_is_dropped() {
        let (mut telephony, mut telephony_peer) = memory_connection();
        let turn = TurnState::new();
        let stats = RelayStats::default();

        handle_ai_frame(
            r#"{"type":"response.audio.delta","delta":""}"#,
            telephony.sink.as_mut(),
            &turn,
            &stats,
        )
        .await
        .unwrap();

        assert_eq!(telephony_peer.try_recv(), None);
        assert_eq!(stats.snapshot().audio_forwarded, 0);
    }

    #[tokio::test]
    async fn test_response_events_drive_phase() {
        let (mut telephony, _peer) = memory_connection();
        let turn = TurnState::new();
        let stats = RelayStats::default();

        for (frame, expected) in [
            (r#"{"type":"response.create"}"#, TurnPhase::Responding),
            (r#"{"type":"response.create"}"#, TurnPhase::Responding),
            (r#"{"type":"response.done"}"#, TurnPhase::Idle),
            (r#"{"type":"response.done"}"#, TurnPhase::Idle),
            (r#"{"type":"rate_limits.updated","rate_limits":[]}"#, TurnPhase::Idle),
        ] {
            handle_ai_frame(frame, telephony.sink.as_mut(), &turn, &stats)
                .await
                .unwrap();
            assert_eq!(turn.phase().await, expected, "after {frame}");
        }
    }

    #[tokio::test]
    async fn test_pump_skips_bad_frames_and_exits_on_close() {
        let (telephony, mut telephony_peer) = memory_connection();
        let (ai, mut ai_peer) = memory_connection();
        let turn = Arc::new(TurnState::new());
        let stats = Arc::new(RelayStats::default());

        telephony_peer.send("garbage").await;
        telephony_peer
            .send(r#"{"event":"media","media":{"payload":"aaaa"}}"#)
            .await;
        telephony_peer.hang_up();

        let report = run_telephony_pump(
            telephony.source,
            ai.sink,
            turn,
            stats.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(report.exit, PumpExit::PeerClosed);
        assert_eq!(stats.snapshot().frames_skipped, 1);
        assert_eq!(
            ai_peer.try_recv().as_deref(),
            Some(r#"{"type":"input_audio_buffer.append","audio":"aaaa"}"#)
        );
    }

    #[tokio::test]
    async fn test_malformed_start_keeps_stream_sid() {
        let (telephony, mut telephony_peer) = memory_connection();
        let (ai, mut ai_peer) = memory_connection();
        let turn = Arc::new(TurnState::new());
        let stats = Arc::new(RelayStats::default());

        telephony_peer
            .send(r#"{"event":"start","start":{"streamSid":"S1"}}"#)
            .await;
        telephony_peer
            .send(r#"{"event":"start","start":{"tracks":["inbound"]}}"#)
            .await;
        telephony_peer
            .send(r#"{"event":"start","start":{"streamSid":"S2","streamId":"S3"}}"#)
            .await;
        telephony_peer.hang_up();

        let report = run_telephony_pump(
            telephony.source,
            ai.sink,
            turn.clone(),
            stats.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(report.exit, PumpExit::PeerClosed);
        assert_eq!(stats.snapshot().frames_skipped, 2);
        assert_eq!(turn.stream_sid().await, "S1");
        assert_eq!(ai_peer.try_recv(), None);
    }

    #[tokio::test]
    async fn test_pump_cancelled_while_write_is_stalled() {
        let (ai, ai_peer) = memory_connection();
        let (stalled, entered) = StalledSink::new();
        let cancel = CancellationToken::new();

        ai_peer
            .send(r#"{"type":"response.audio.delta","delta":"xyz"}"#)
            .await;

        let pump = tokio::spawn(run_ai_pump(
            ai.source,
            Box::new(stalled),
            Arc::new(TurnState::new()),
            Arc::new(RelayStats::default()),
            cancel.clone(),
        ));
        entered.notified().await;
        cancel.cancel();

        let report = tokio::time::timeout(std::time::Duration::from_secs(5), pump)
            .await
            .expect("pump ignored cancellation")
            .unwrap();
        assert_eq!(report.exit, PumpExit::Cancelled);
    }

    #[tokio::test]
    async fn test_pump_exits_on_write_failure() {
        let (telephony, telephony_peer) = memory_connection();
        let (ai, ai_peer) = memory_connection();
        drop(ai_peer);

        telephony_peer
            .send(r#"{"event":"media","media":{"payload":"aaaa"}}"#)
            .await;

        let report = run_telephony_pump(
            telephony.source,
            ai.sink,
            Arc::new(TurnState::new()),
            Arc::new(RelayStats::default()),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(report.exit, PumpExit::TransportFailed(_)));
    }

    #[tokio::test]
    async fn test_pump_honours_cancellation() {
        let (ai, _ai_peer) = memory_connection();
        let (telephony, _telephony_peer) = memory_connection();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = run_ai_pump(
            ai.source,
            telephony.sink,
            Arc::new(TurnState::new()),
            Arc::new(RelayStats::default()),
            cancel,
        )
        .await;
        assert_eq!(report.exit, PumpExit::Cancelled);
    }
}
