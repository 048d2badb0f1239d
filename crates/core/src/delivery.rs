//! Delivery Orchestrator
//!
//! One background task per session drives the multi-step delivery
//! choreography: wait out the acknowledgment, generate the report, speak
//! the summary, say goodbye, end the session. The foreground event loop
//! only ever hands it signals over a channel and is never blocked on the
//! report call or on audio-drain sleeps.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tutor_realtime_types::ClientEvent;

use crate::assessor::{Assessor, ReportStore};
use crate::config::{
    ACK_AUDIO_TIMEOUT, DRAIN_SAFETY_MARGIN_SECS, GOODBYE_AUDIO_TIMEOUT, GOODBYE_DRAIN,
    InterviewConfig, SUMMARY_AUDIO_TIMEOUT,
};
use crate::outbound::{LanguageHint, OutboundTx, spoken_response};
use crate::report::AssessmentReport;
use crate::session::{ConversationTurn, InterviewSession};
use crate::state_machine::{AssessmentPhase, AssessmentStateMachine};

/// Signals fanned out from the event router to the orchestrator.
#[derive(Debug, Clone)]
pub enum DeliverySignal {
    /// A response finished from the remote's perspective.
    ResponseDone(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("report generation failed after {attempts} attempt(s): {source}")]
    ReportGeneration {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("outbound channel closed")]
    OutboundClosed,
}

/// Spoken words per second used when no byte-accurate duration exists.
const FALLBACK_WORDS_PER_SECOND: f64 = 2.5;

/// Extra wait after audio completion, covering client-side playback
/// buffering the transcript signal does not capture.
pub fn drain_delay(audio_duration_seconds: Option<f64>, summary: &str) -> Duration {
    match audio_duration_seconds {
        Some(duration) => Duration::from_secs_f64(duration + DRAIN_SAFETY_MARGIN_SECS),
        None => {
            let words = summary.split_whitespace().count();
            let estimated = words as f64 / FALLBACK_WORDS_PER_SECOND + DRAIN_SAFETY_MARGIN_SECS;
            Duration::from_secs_f64(estimated.clamp(5.0, 30.0))
        }
    }
}

pub struct DeliveryOrchestrator {
    machine: Arc<AssessmentStateMachine>,
    session: Arc<Mutex<InterviewSession>>,
    config: Arc<InterviewConfig>,
    assessor: Arc<dyn Assessor + Send + Sync>,
    store: Arc<dyn ReportStore + Send + Sync>,
    outbound: OutboundTx,
    cancel: CancellationToken,
    end_signal: CancellationToken,
}

impl DeliveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine: Arc<AssessmentStateMachine>,
        session: Arc<Mutex<InterviewSession>>,
        config: Arc<InterviewConfig>,
        assessor: Arc<dyn Assessor + Send + Sync>,
        store: Arc<dyn ReportStore + Send + Sync>,
        outbound: OutboundTx,
        cancel: CancellationToken,
        end_signal: CancellationToken,
    ) -> Self {
        Self {
            machine,
            session,
            config,
            assessor,
            store,
            outbound,
            cancel,
            end_signal,
        }
    }

    /// Consumes delivery signals until cancelled or the channel closes.
    pub async fn run(self, mut signals: mpsc::Receiver<DeliverySignal>) {
        loop {
            let signal = tokio::select! {
                _ = self.cancel.cancelled() => break,
                signal = signals.recv() => match signal {
                    None => break,
                    Some(signal) => signal,
                },
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.handle(signal) => {}
            }
        }
        tracing::debug!("delivery orchestrator stopped");
    }

    async fn handle(&self, signal: DeliverySignal) {
        match signal {
            DeliverySignal::ResponseDone(response_id) => {
                self.on_response_done(&response_id).await;
            }
        }
    }

    async fn on_response_done(&self, response_id: &str) {
        match self.machine.phase() {
            AssessmentPhase::AckGenerating | AssessmentPhase::AckSpeaking => {
                self.deliver_summary(response_id).await;
            }
            AssessmentPhase::SummarySending | AssessmentPhase::SummarySpeaking => {
                self.deliver_goodbye(response_id).await;
            }
            AssessmentPhase::GoodbyeSending | AssessmentPhase::GoodbyeSpeaking => {
                self.finish(response_id).await;
            }
            phase => {
                tracing::debug!("response done in phase {phase}, no delivery step");
            }
        }
    }

    /// Acknowledgment finished: generate the report and send the summary to
    /// be spoken.
    async fn deliver_summary(&self, ack_response_id: &str) {
        if !self
            .machine
            .wait_for_audio_complete(ack_response_id, ACK_AUDIO_TIMEOUT)
            .await
        {
            tracing::warn!("acknowledgment audio timed out, proceeding with report generation");
        }
        if !self.machine.start_report_generation() {
            return;
        }

        let transcript = {
            let session = lock(&self.session);
            session.history_snapshot()
        };
        tracing::info!(
            "generating assessment report from {} conversation turns",
            transcript.len()
        );

        match self.generate_report(&transcript).await {
            Ok(report) => {
                let summary = report.verbal_summary();
                self.machine.set_verbal_summary(&summary);
                if let Err(e) = self.store.persist(&report, &summary).await {
                    tracing::warn!("failed to persist assessment report: {e:#}");
                }
                tracing::info!("sending assessment summary to be spoken");
                if let Err(e) = self
                    .send(spoken_response(&summary, LanguageHint::English))
                    .await
                {
                    tracing::error!("{e}");
                }
            }
            Err(e) => {
                // No automatic retry beyond the configured attempts: the
                // machine stays in report_generating and the session must
                // be ended manually.
                tracing::error!("{e}");
                if let Err(e) = self
                    .send(spoken_response(
                        &self.config.prompts.apology_message,
                        LanguageHint::English,
                    ))
                    .await
                {
                    tracing::error!("{e}");
                }
            }
        }
    }

    async fn generate_report(
        &self,
        transcript: &[ConversationTurn],
    ) -> Result<AssessmentReport, DeliveryError> {
        let attempts = self.config.max_report_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.assessor.generate_report(transcript).await {
                Ok(report) => return Ok(report),
                Err(e) => {
                    tracing::warn!("report generation attempt {attempt}/{attempts} failed: {e:#}");
                    last_error = Some(e);
                }
            }
        }
        Err(DeliveryError::ReportGeneration {
            attempts,
            source: last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts made")),
        })
    }

    /// Summary finished: drain the playback buffer, then say goodbye.
    async fn deliver_goodbye(&self, summary_response_id: &str) {
        if !self
            .machine
            .wait_for_audio_complete(summary_response_id, SUMMARY_AUDIO_TIMEOUT)
            .await
        {
            tracing::warn!("summary audio timed out, proceeding with goodbye");
        }

        let summary = self.machine.verbal_summary().unwrap_or_default();
        let delay = drain_delay(
            self.machine.estimated_duration(summary_response_id),
            &summary,
        );
        tracing::info!("draining playback buffer for {:.1}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;

        if self.machine.can_send_goodbye() {
            tracing::info!("sending goodbye message");
            if let Err(e) = self
                .send(spoken_response(
                    &self.config.prompts.goodbye_message,
                    LanguageHint::English,
                ))
                .await
            {
                tracing::error!("{e}");
            }
        } else {
            tracing::warn!("summary audio never completed, goodbye not sent");
        }
    }

    /// Goodbye finished: final drain, mark complete, end the session.
    async fn finish(&self, goodbye_response_id: &str) {
        if !self
            .machine
            .wait_for_audio_complete(goodbye_response_id, GOODBYE_AUDIO_TIMEOUT)
            .await
        {
            tracing::warn!("goodbye audio timed out");
        }
        tokio::time::sleep(GOODBYE_DRAIN).await;

        self.machine.mark_complete();
        tracing::info!("assessment delivery complete, ending session");
        self.end_signal.cancel();
    }

    async fn send(&self, event: ClientEvent) -> Result<(), DeliveryError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| DeliveryError::OutboundClosed)
    }
}

fn lock(session: &Mutex<InterviewSession>) -> std::sync::MutexGuard<'_, InterviewSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
