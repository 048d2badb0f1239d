//! Assessment Delivery State Machine
//!
//! Explicit state tracking for the scripted delivery sequence that follows a
//! triggered assessment: acknowledgment, report generation, spoken summary,
//! goodbye. Responses are tracked by ID, and audio completion is kept
//! separate from response completion since the remote emits the two signals
//! independently and in either order.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tutor_realtime_types::audio::PCM16_BYTES_PER_SECOND;

/// States during assessment delivery, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentPhase {
    /// Normal conversation, no assessment in progress.
    Inactive,
    /// Assessment requested, no response issued yet.
    Triggered,
    /// Acknowledgment response created, audio not yet started.
    AckGenerating,
    /// Acknowledgment audio streaming.
    AckSpeaking,
    /// Report generation in flight.
    ReportGenerating,
    /// Summary response created, audio not yet started.
    SummarySending,
    /// Summary audio streaming.
    SummarySpeaking,
    /// Goodbye response created, audio not yet started.
    GoodbyeSending,
    /// Goodbye audio streaming.
    GoodbyeSpeaking,
    /// Delivery finished, the session should end.
    Complete,
}

impl fmt::Display for AssessmentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inactive => "inactive",
            Self::Triggered => "triggered",
            Self::AckGenerating => "ack_generating",
            Self::AckSpeaking => "ack_speaking",
            Self::ReportGenerating => "report_generating",
            Self::SummarySending => "summary_sending",
            Self::SummarySpeaking => "summary_speaking",
            Self::GoodbyeSending => "goodbye_sending",
            Self::GoodbyeSpeaking => "goodbye_speaking",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Which delivery step an outbound response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePhase {
    Acknowledgment,
    Summary,
    Goodbye,
}

/// Per-response bookkeeping for one outbound response unit.
#[derive(Debug)]
pub struct ResponseTracker {
    response_id: String,
    phase: ResponsePhase,
    audio_started: bool,
    audio_complete: bool,
    response_complete: bool,
    audio_bytes_received: u64,
    audio_done: Arc<Notify>,
}

impl ResponseTracker {
    pub fn new(response_id: &str, phase: ResponsePhase) -> Self {
        Self {
            response_id: response_id.to_string(),
            phase,
            audio_started: false,
            audio_complete: false,
            response_complete: false,
            audio_bytes_received: 0,
            audio_done: Arc::new(Notify::new()),
        }
    }

    pub fn mark_audio_started(&mut self) {
        self.audio_started = true;
    }

    pub fn add_audio_bytes(&mut self, count: usize) {
        self.audio_bytes_received += count as u64;
    }

    /// Marks the spoken transcript for this response as fully delivered and
    /// releases anything blocked on the completion signal. Idempotent.
    pub fn mark_audio_complete(&mut self) {
        self.audio_complete = true;
        self.audio_done.notify_one();
    }

    /// Marks the response object itself as finished. This does NOT mean the
    /// audio is complete. Idempotent.
    pub fn mark_response_complete(&mut self) {
        self.response_complete = true;
    }

    /// Spoken duration derived from received bytes of 16-bit mono PCM at
    /// 24 kHz.
    pub fn estimated_duration_seconds(&self) -> f64 {
        self.audio_bytes_received as f64 / PCM16_BYTES_PER_SECOND as f64
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn phase(&self) -> ResponsePhase {
        self.phase
    }

    pub fn audio_started(&self) -> bool {
        self.audio_started
    }

    pub fn audio_complete(&self) -> bool {
        self.audio_complete
    }

    pub fn response_complete(&self) -> bool {
        self.response_complete
    }

    pub fn audio_bytes_received(&self) -> u64 {
        self.audio_bytes_received
    }
}

struct MachineInner {
    phase: AssessmentPhase,
    active_response_id: Option<String>,
    trackers: HashMap<String, ResponseTracker>,
    trigger_reason: String,
    verbal_summary: Option<String>,
}

/// Manages assessment delivery state transitions.
///
/// One instance per interview session. Mutated from the foreground event
/// loop and from the session's single background choreography task, so all
/// state lives behind a mutex; the lock is never held across an await.
pub struct AssessmentStateMachine {
    inner: Mutex<MachineInner>,
}

impl Default for AssessmentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AssessmentStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MachineInner {
                phase: AssessmentPhase::Inactive,
                active_response_id: None,
                trackers: HashMap::new(),
                trigger_reason: String::new(),
                verbal_summary: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MachineInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> AssessmentPhase {
        self.lock().phase
    }

    pub fn is_active(&self) -> bool {
        self.lock().phase != AssessmentPhase::Inactive
    }

    pub fn is_complete(&self) -> bool {
        self.lock().phase == AssessmentPhase::Complete
    }

    pub fn active_response_id(&self) -> Option<String> {
        self.lock().active_response_id.clone()
    }

    pub fn trigger_reason(&self) -> String {
        self.lock().trigger_reason.clone()
    }

    pub fn verbal_summary(&self) -> Option<String> {
        self.lock().verbal_summary.clone()
    }

    pub fn set_verbal_summary(&self, summary: &str) {
        self.lock().verbal_summary = Some(summary.to_string());
    }

    /// Triggers the assessment. Returns false when one is already in
    /// progress, in which case the caller must ignore the duplicate rather
    /// than treat it as an error.
    pub fn trigger(&self, reason: &str) -> bool {
        let mut inner = self.lock();
        if inner.phase != AssessmentPhase::Inactive {
            tracing::warn!("assessment already triggered (phase: {})", inner.phase);
            return false;
        }
        inner.phase = AssessmentPhase::Triggered;
        inner.trigger_reason = reason.to_string();
        tracing::info!("assessment phase -> {}", inner.phase);
        true
    }

    /// Registers a newly created response against the current delivery step
    /// and advances the phase. Registration from a phase where the step is
    /// not legal is a caller bug and is rejected as a logged no-op.
    pub fn register_response(&self, response_id: &str, phase: ResponsePhase) -> bool {
        let mut inner = self.lock();
        let next = match (phase, inner.phase) {
            (ResponsePhase::Acknowledgment, AssessmentPhase::Triggered) => {
                AssessmentPhase::AckGenerating
            }
            (ResponsePhase::Summary, AssessmentPhase::ReportGenerating) => {
                AssessmentPhase::SummarySending
            }
            (
                ResponsePhase::Goodbye,
                AssessmentPhase::SummarySending | AssessmentPhase::SummarySpeaking,
            ) => AssessmentPhase::GoodbyeSending,
            (phase, current) => {
                tracing::warn!("unexpected {phase:?} response in phase {current}");
                return false;
            }
        };
        inner.phase = next;
        inner.active_response_id = Some(response_id.to_string());
        inner
            .trackers
            .insert(response_id.to_string(), ResponseTracker::new(response_id, phase));
        tracing::info!("assessment phase -> {} (response {})", next, short_id(response_id));
        true
    }

    /// Records the first audio data for a response. The first chunk for the
    /// currently active response advances `*_generating`/`*_sending` to the
    /// matching `*_speaking` phase. Unknown response IDs are ignored; they
    /// are usually leftovers from the conversation preceding the trigger.
    pub fn on_audio_chunk(&self, response_id: &str) {
        let mut inner = self.lock();
        let first = match inner.trackers.get_mut(response_id) {
            None => return,
            Some(tracker) => {
                let first = !tracker.audio_started();
                tracker.mark_audio_started();
                first
            }
        };
        if !first || inner.active_response_id.as_deref() != Some(response_id) {
            return;
        }
        let next = match inner.phase {
            AssessmentPhase::AckGenerating => AssessmentPhase::AckSpeaking,
            AssessmentPhase::SummarySending => AssessmentPhase::SummarySpeaking,
            AssessmentPhase::GoodbyeSending => AssessmentPhase::GoodbyeSpeaking,
            _ => return,
        };
        inner.phase = next;
        tracing::info!("assessment phase -> {}", next);
    }

    /// Accumulates audio payload bytes for duration estimation.
    pub fn on_audio_bytes(&self, response_id: &str, count: usize) {
        if let Some(tracker) = self.lock().trackers.get_mut(response_id) {
            tracker.add_audio_bytes(count);
        }
    }

    /// The authoritative signal that speech for a response finished
    /// rendering. `response.done` must not be used for this purpose.
    pub fn on_audio_transcript_done(&self, response_id: &str) {
        let mut inner = self.lock();
        match inner.trackers.get_mut(response_id) {
            None => {
                tracing::debug!("audio complete for untracked response {}", short_id(response_id));
            }
            Some(tracker) => {
                tracker.mark_audio_complete();
                tracing::info!(
                    "audio complete for {:?} (response {})",
                    tracker.phase(),
                    short_id(response_id)
                );
            }
        }
    }

    /// Records that the response object finished from the remote's
    /// perspective. Does not advance the phase.
    pub fn on_response_done(&self, response_id: &str) {
        let mut inner = self.lock();
        if let Some(tracker) = inner.trackers.get_mut(response_id) {
            tracker.mark_response_complete();
            tracing::info!(
                "response complete for {:?} (response {})",
                tracker.phase(),
                short_id(response_id)
            );
        }
    }

    pub fn can_proceed_to_report_generation(&self) -> bool {
        matches!(
            self.lock().phase,
            AssessmentPhase::AckGenerating | AssessmentPhase::AckSpeaking
        )
    }

    pub fn start_report_generation(&self) -> bool {
        let mut inner = self.lock();
        if !matches!(
            inner.phase,
            AssessmentPhase::AckGenerating | AssessmentPhase::AckSpeaking
        ) {
            tracing::warn!("cannot generate report in phase {}", inner.phase);
            return false;
        }
        inner.phase = AssessmentPhase::ReportGenerating;
        tracing::info!("assessment phase -> {}", inner.phase);
        true
    }

    /// True once the report is being generated and the acknowledgment audio
    /// has fully played out.
    pub fn can_send_summary(&self) -> bool {
        let inner = self.lock();
        if inner.phase != AssessmentPhase::ReportGenerating {
            return false;
        }
        active_tracker(&inner).is_some_and(ResponseTracker::audio_complete)
    }

    /// True once the summary audio has fully played out.
    pub fn can_send_goodbye(&self) -> bool {
        let inner = self.lock();
        if !matches!(
            inner.phase,
            AssessmentPhase::SummarySending | AssessmentPhase::SummarySpeaking
        ) {
            return false;
        }
        active_tracker(&inner).is_some_and(ResponseTracker::audio_complete)
    }

    /// Unconditional jump to the terminal phase. Used on the happy path
    /// after the goodbye audio and for early exit when the user
    /// acknowledges before the sequence finishes.
    pub fn mark_complete(&self) {
        let mut inner = self.lock();
        inner.phase = AssessmentPhase::Complete;
        tracing::info!("assessment phase -> {}", inner.phase);
    }

    pub fn audio_complete(&self, response_id: &str) -> bool {
        self.lock()
            .trackers
            .get(response_id)
            .is_some_and(ResponseTracker::audio_complete)
    }

    pub fn audio_started(&self, response_id: &str) -> bool {
        self.lock()
            .trackers
            .get(response_id)
            .is_some_and(ResponseTracker::audio_started)
    }

    pub fn response_complete(&self, response_id: &str) -> bool {
        self.lock()
            .trackers
            .get(response_id)
            .is_some_and(ResponseTracker::response_complete)
    }

    pub fn estimated_duration(&self, response_id: &str) -> Option<f64> {
        self.lock()
            .trackers
            .get(response_id)
            .map(ResponseTracker::estimated_duration_seconds)
    }

    /// Suspends until the response's audio is complete or the timeout
    /// elapses. Returns false immediately for unknown response IDs.
    pub async fn wait_for_audio_complete(&self, response_id: &str, timeout: Duration) -> bool {
        let notify = {
            let inner = self.lock();
            match inner.trackers.get(response_id) {
                None => {
                    tracing::warn!("cannot wait for unknown response {}", short_id(response_id));
                    return false;
                }
                Some(tracker) if tracker.audio_complete() => return true,
                Some(tracker) => tracker.audio_done.clone(),
            }
        };

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.audio_complete(response_id) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notify.notified()).await.is_err() {
                let complete = self.audio_complete(response_id);
                if !complete {
                    tracing::warn!("timeout waiting for audio of response {}", short_id(response_id));
                }
                return complete;
            }
        }
    }
}

fn active_tracker<'a>(inner: &'a MachineInner) -> Option<&'a ResponseTracker> {
    inner
        .active_response_id
        .as_deref()
        .and_then(|id| inner.trackers.get(id))
}

/// Response IDs are long and opaque; the tail is enough to correlate logs.
fn short_id(response_id: &str) -> &str {
    let tail = response_id.len().saturating_sub(8);
    response_id.get(tail..).unwrap_or(response_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_inactive() {
        let machine = AssessmentStateMachine::new();
        assert_eq!(machine.phase(), AssessmentPhase::Inactive);
        assert!(!machine.is_active());
        assert!(!machine.is_complete());
    }

    #[test]
    fn trigger_stores_reason() {
        let machine = AssessmentStateMachine::new();
        assert!(machine.trigger("User reached ceiling at A2"));
        assert_eq!(machine.phase(), AssessmentPhase::Triggered);
        assert_eq!(machine.trigger_reason(), "User reached ceiling at A2");
    }

    #[test]
    fn duplicate_trigger_is_rejected() {
        let machine = AssessmentStateMachine::new();
        assert!(machine.trigger("first"));
        assert!(!machine.trigger("duplicate"));
        assert_eq!(machine.phase(), AssessmentPhase::Triggered);
        assert_eq!(machine.trigger_reason(), "first");
    }

    #[test]
    fn acknowledgment_flow() {
        let machine = AssessmentStateMachine::new();
        machine.trigger("test");

        assert!(machine.register_response("resp_123", ResponsePhase::Acknowledgment));
        assert_eq!(machine.phase(), AssessmentPhase::AckGenerating);
        assert_eq!(machine.active_response_id().as_deref(), Some("resp_123"));

        machine.on_audio_chunk("resp_123");
        assert_eq!(machine.phase(), AssessmentPhase::AckSpeaking);
        assert!(machine.audio_started("resp_123"));

        machine.on_audio_transcript_done("resp_123");
        assert!(machine.audio_complete("resp_123"));
    }

    #[test]
    fn illegal_registration_is_a_no_op() {
        let machine = AssessmentStateMachine::new();

        assert!(!machine.register_response("resp_1", ResponsePhase::Acknowledgment));
        assert_eq!(machine.phase(), AssessmentPhase::Inactive);

        machine.trigger("test");
        assert!(!machine.register_response("resp_1", ResponsePhase::Summary));
        assert!(!machine.register_response("resp_1", ResponsePhase::Goodbye));
        assert_eq!(machine.phase(), AssessmentPhase::Triggered);
    }

    #[test]
    fn events_for_unknown_responses_are_ignored() {
        let machine = AssessmentStateMachine::new();
        machine.trigger("test");
        machine.on_audio_chunk("unknown");
        machine.on_audio_bytes("unknown", 4800);
        machine.on_audio_transcript_done("unknown");
        machine.on_response_done("unknown");
        assert_eq!(machine.phase(), AssessmentPhase::Triggered);
    }

    #[test]
    fn audio_chunk_for_inactive_response_does_not_advance_phase() {
        let machine = AssessmentStateMachine::new();
        machine.trigger("test");
        machine.register_response("resp_1", ResponsePhase::Acknowledgment);
        machine.on_audio_chunk("resp_1");
        machine.on_audio_transcript_done("resp_1");
        machine.start_report_generation();
        machine.register_response("resp_2", ResponsePhase::Summary);

        // Late chunk for the acknowledgment must not move the phase.
        machine.on_audio_chunk("resp_1");
        assert_eq!(machine.phase(), AssessmentPhase::SummarySending);
    }

    #[test]
    fn report_generation_gate() {
        let machine = AssessmentStateMachine::new();
        assert!(!machine.start_report_generation());

        machine.trigger("test");
        assert!(!machine.can_proceed_to_report_generation());

        machine.register_response("resp_123", ResponsePhase::Acknowledgment);
        assert!(machine.can_proceed_to_report_generation());
        machine.on_audio_chunk("resp_123");
        assert!(machine.can_proceed_to_report_generation());

        assert!(machine.start_report_generation());
        assert_eq!(machine.phase(), AssessmentPhase::ReportGenerating);
        assert!(!machine.can_proceed_to_report_generation());
    }

    #[test]
    fn summary_gate_requires_phase_and_ack_audio() {
        let machine = AssessmentStateMachine::new();
        machine.trigger("test");
        machine.register_response("resp_123", ResponsePhase::Acknowledgment);

        // Ack audio complete but still in the ack phase.
        machine.on_audio_transcript_done("resp_123");
        assert!(!machine.can_send_summary());

        machine.start_report_generation();
        assert!(machine.can_send_summary());
    }

    #[test]
    fn goodbye_gate_requires_summary_audio() {
        let machine = AssessmentStateMachine::new();
        machine.trigger("test");
        machine.register_response("resp_1", ResponsePhase::Acknowledgment);
        machine.on_audio_transcript_done("resp_1");
        machine.start_report_generation();
        machine.register_response("resp_2", ResponsePhase::Summary);
        machine.on_audio_chunk("resp_2");
        assert_eq!(machine.phase(), AssessmentPhase::SummarySpeaking);

        assert!(!machine.can_send_goodbye());
        machine.on_audio_transcript_done("resp_2");
        assert!(machine.can_send_goodbye());
    }

    #[test]
    fn response_done_does_not_advance_phase() {
        let machine = AssessmentStateMachine::new();
        machine.trigger("test");
        machine.register_response("resp_123", ResponsePhase::Acknowledgment);

        machine.on_response_done("resp_123");
        assert!(machine.response_complete("resp_123"));
        assert!(!machine.audio_complete("resp_123"));
        assert_eq!(machine.phase(), AssessmentPhase::AckGenerating);

        // Audio completion may arrive after response completion.
        machine.on_audio_transcript_done("resp_123");
        assert!(machine.audio_complete("resp_123"));
    }

    #[test]
    fn full_delivery_sequence() {
        let machine = AssessmentStateMachine::new();

        assert!(machine.trigger("ceiling B1"));
        assert!(machine.register_response("r1", ResponsePhase::Acknowledgment));
        machine.on_audio_chunk("r1");
        assert_eq!(machine.phase(), AssessmentPhase::AckSpeaking);
        machine.on_audio_transcript_done("r1");

        assert!(machine.start_report_generation());
        assert_eq!(machine.phase(), AssessmentPhase::ReportGenerating);
        machine.set_verbal_summary("You are at B1.");
        assert!(machine.can_send_summary());

        assert!(machine.register_response("r2", ResponsePhase::Summary));
        machine.on_audio_chunk("r2");
        assert_eq!(machine.phase(), AssessmentPhase::SummarySpeaking);
        machine.on_audio_transcript_done("r2");
        assert!(machine.can_send_goodbye());

        assert!(machine.register_response("r3", ResponsePhase::Goodbye));
        assert_eq!(machine.phase(), AssessmentPhase::GoodbyeSending);
        machine.on_audio_chunk("r3");
        assert_eq!(machine.phase(), AssessmentPhase::GoodbyeSpeaking);
        machine.on_audio_transcript_done("r3");

        machine.mark_complete();
        assert_eq!(machine.phase(), AssessmentPhase::Complete);
        assert!(machine.is_complete());
    }

    #[test]
    fn early_exit_jumps_to_complete() {
        let machine = AssessmentStateMachine::new();
        machine.trigger("test");
        machine.register_response("r1", ResponsePhase::Acknowledgment);
        machine.on_audio_chunk("r1");

        machine.mark_complete();
        assert!(machine.is_complete());
    }

    #[test]
    fn tracker_duration_from_bytes() {
        let mut tracker = ResponseTracker::new("resp_1", ResponsePhase::Summary);
        assert_eq!(tracker.estimated_duration_seconds(), 0.0);
        tracker.add_audio_bytes(96_000);
        assert_eq!(tracker.estimated_duration_seconds(), 2.0);
    }

    #[test]
    fn tracker_marks_are_idempotent() {
        let mut tracker = ResponseTracker::new("resp_1", ResponsePhase::Acknowledgment);
        tracker.mark_audio_complete();
        tracker.mark_audio_complete();
        tracker.mark_response_complete();
        tracker.mark_response_complete();
        assert!(tracker.audio_complete());
        assert!(tracker.response_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_unknown_response_returns_false_immediately() {
        let machine = AssessmentStateMachine::new();
        let before = tokio::time::Instant::now();
        let result = machine
            .wait_for_audio_complete("unknown", Duration::from_secs(5))
            .await;
        assert!(!result);
        assert_eq!(tokio::time::Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_immediately_when_already_complete() {
        let machine = AssessmentStateMachine::new();
        machine.trigger("test");
        machine.register_response("resp_123", ResponsePhase::Acknowledgment);
        machine.on_audio_transcript_done("resp_123");

        let before = tokio::time::Instant::now();
        let result = machine
            .wait_for_audio_complete("resp_123", Duration::from_secs(5))
            .await;
        assert!(result);
        assert_eq!(tokio::time::Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resolves_when_audio_completes_concurrently() {
        let machine = std::sync::Arc::new(AssessmentStateMachine::new());
        machine.trigger("test");
        machine.register_response("resp_123", ResponsePhase::Acknowledgment);

        let background = machine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            background.on_audio_transcript_done("resp_123");
        });

        let result = machine
            .wait_for_audio_complete("resp_123", Duration::from_secs(2))
            .await;
        assert!(result);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_audio_never_completes() {
        let machine = AssessmentStateMachine::new();
        machine.trigger("test");
        machine.register_response("resp_123", ResponsePhase::Acknowledgment);

        let result = machine
            .wait_for_audio_complete("resp_123", Duration::from_millis(100))
            .await;
        assert!(!result);
    }
}
