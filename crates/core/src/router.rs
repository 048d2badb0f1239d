//! Event Router
//!
//! Demultiplexes inbound protocol events into state-machine mutations and
//! side-channel actions. An event may belong to more than one category:
//! `response.audio_transcript.done` is both an audio lifecycle signal and a
//! transcript flush point, so it is dispatched to both handlers.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tutor_realtime_types::events::server::ResponseFunctionCallArgumentsDoneEvent;
use tutor_realtime_types::{ClientEvent, ServerEvent};

use crate::audio::decode_audio_delta;
use crate::config::{InterviewConfig, TRIGGER_FUNCTION};
use crate::delivery::DeliverySignal;
use crate::keywords::is_acknowledgment;
use crate::outbound::{AudioTx, OutboundTx, clear_input_buffer, create_response, tool_output};
use crate::session::{InterviewSession, Speaker};
use crate::state_machine::{AssessmentPhase, AssessmentStateMachine, ResponsePhase};

pub struct EventRouter {
    machine: Arc<AssessmentStateMachine>,
    session: Arc<Mutex<InterviewSession>>,
    config: Arc<InterviewConfig>,
    outbound: OutboundTx,
    audio_out: AudioTx,
    delivery: mpsc::Sender<DeliverySignal>,
    end_signal: CancellationToken,
}

impl EventRouter {
    pub(crate) fn new(
        machine: Arc<AssessmentStateMachine>,
        session: Arc<Mutex<InterviewSession>>,
        config: Arc<InterviewConfig>,
        outbound: OutboundTx,
        audio_out: AudioTx,
        delivery: mpsc::Sender<DeliverySignal>,
        end_signal: CancellationToken,
    ) -> Self {
        Self {
            machine,
            session,
            config,
            outbound,
            audio_out,
            delivery,
            end_signal,
        }
    }

    pub fn machine(&self) -> &Arc<AssessmentStateMachine> {
        &self.machine
    }

    pub fn session(&self) -> &Arc<Mutex<InterviewSession>> {
        &self.session
    }

    /// Routes one inbound event to every matching handler.
    pub async fn dispatch(&mut self, event: &ServerEvent) {
        if is_audio_event(event) {
            self.handle_audio(event).await;
        }
        if is_transcript_event(event) {
            self.handle_transcript(event).await;
        }
        if is_function_event(event) {
            self.handle_function(event).await;
        }
        if is_lifecycle_event(event) {
            self.handle_lifecycle(event).await;
        }
    }

    async fn handle_audio(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ResponseAudioDelta(delta) => {
                let bytes = decode_audio_delta(delta.delta());
                if bytes.is_empty() {
                    return;
                }
                let count = bytes.len();
                if let Err(e) = self.audio_out.send(bytes).await {
                    tracing::warn!("failed to queue audio for playback: {e}");
                }
                if self.machine.is_active() {
                    self.machine.on_audio_chunk(delta.response_id());
                    self.machine.on_audio_bytes(delta.response_id(), count);
                }
            }
            ServerEvent::ResponseAudioTranscriptDone(done) => {
                if self.machine.is_active() {
                    self.machine.on_audio_transcript_done(done.response_id());
                }
            }
            _ => {}
        }
    }

    async fn handle_transcript(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ResponseAudioTranscriptDelta(delta) => {
                self.lock_session().push_transcript_delta(delta.delta());
            }
            ServerEvent::ResponseAudioTranscriptDone(_) => {
                let text = self.lock_session().take_transcript();
                if text.is_empty() {
                    return;
                }
                tracing::info!("interviewer said: {text}");
                // Utterances spoken during assessment delivery are not
                // interview content.
                if !self.machine.is_active() {
                    self.lock_session().add_turn(Speaker::Interviewer, &text);
                }
            }
            ServerEvent::ConversationItemInputAudioTranscriptionCompleted(completed) => {
                let text = completed.transcript().trim().to_string();
                tracing::info!("learner said: {text}");
                if !self.machine.is_active() {
                    self.lock_session().add_turn(Speaker::Learner, &text);
                } else if !self.machine.is_complete() && is_acknowledgment(&text) {
                    tracing::info!("user acknowledged during assessment delivery, ending early");
                    self.machine.mark_complete();
                    self.end_signal.cancel();
                }
            }
            _ => {}
        }
    }

    async fn handle_function(&mut self, event: &ServerEvent) {
        let ServerEvent::ResponseFunctionCallArgumentsDone(call) = event else {
            return;
        };
        match call.name() {
            Some(TRIGGER_FUNCTION) => self.handle_trigger_assessment(call).await,
            Some(other) => tracing::debug!("function '{other}' called, not handled"),
            None => tracing::debug!("function call without a name, ignoring"),
        }
    }

    async fn handle_trigger_assessment(&mut self, call: &ResponseFunctionCallArgumentsDoneEvent) {
        let reason = parse_trigger_reason(
            call.arguments(),
            &self.config.prompts.fallback_trigger_reason,
        );
        if !self.machine.trigger(&reason) {
            tracing::warn!("assessment already triggered, ignoring duplicate call");
            return;
        }
        tracing::info!("assessment triggered: {reason}");

        // Clear buffered user audio so it cannot interfere with delivery,
        // then instruct the model to acknowledge out loud.
        self.send(clear_input_buffer()).await;
        self.send(tool_output(call.call_id(), &self.config.prompts.ack_instruction))
            .await;
        self.send(create_response()).await;
    }

    async fn handle_lifecycle(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::SessionCreated(created) => {
                tracing::info!("session created: {:?}", created.session().id());
            }
            ServerEvent::SessionUpdated(_) => {
                tracing::info!("session updated");
            }
            ServerEvent::InputAudioBufferSpeechStarted(started) => {
                tracing::debug!("user speech started at {}ms", started.audio_start_ms());
            }
            ServerEvent::InputAudioBufferSpeechStopped(stopped) => {
                tracing::debug!("user speech stopped at {}ms", stopped.audio_end_ms());
            }
            ServerEvent::ResponseCreated(created) => {
                self.handle_response_created(created.response().id());
            }
            ServerEvent::ResponseDone(done) => {
                let resource = done.response();
                if let Some(usage) = resource.usage() {
                    self.lock_session().add_usage(usage);
                    tracing::debug!(
                        "usage: total={}, input={}, output={}",
                        usage.total_tokens(),
                        usage.input_tokens(),
                        usage.output_tokens()
                    );
                }
                self.machine.on_response_done(resource.id());
                if self.machine.is_active() && !self.machine.is_complete() {
                    let signal = DeliverySignal::ResponseDone(resource.id().to_string());
                    if let Err(e) = self.delivery.send(signal).await {
                        tracing::warn!("failed to signal delivery orchestrator: {e}");
                    }
                }
            }
            ServerEvent::Error(error) => {
                tracing::error!("remote error: {}", error.error().message());
            }
            ServerEvent::Close { reason } => {
                tracing::info!("connection closed: {reason:?}");
            }
            _ => {}
        }
    }

    /// Maps a newly created response to a delivery step based on the
    /// current phase. Ordinary conversation responses are never registered.
    fn handle_response_created(&self, response_id: &str) {
        match self.machine.phase() {
            AssessmentPhase::Triggered => {
                self.machine
                    .register_response(response_id, ResponsePhase::Acknowledgment);
            }
            AssessmentPhase::ReportGenerating => {
                // Until the verbal summary exists this is a plain
                // conversation response, not the summary being spoken.
                if self.machine.verbal_summary().is_some() {
                    self.machine
                        .register_response(response_id, ResponsePhase::Summary);
                }
            }
            AssessmentPhase::SummarySending | AssessmentPhase::SummarySpeaking => {
                let summary_done = self
                    .machine
                    .active_response_id()
                    .is_some_and(|id| self.machine.audio_complete(&id));
                if summary_done {
                    self.machine
                        .register_response(response_id, ResponsePhase::Goodbye);
                }
            }
            _ => {}
        }
    }

    async fn send(&self, event: ClientEvent) {
        if let Err(e) = self.outbound.send(event).await {
            tracing::error!("failed to send outbound event: {e}");
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, InterviewSession> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_audio_event(event: &ServerEvent) -> bool {
    matches!(
        event,
        ServerEvent::ResponseAudioDelta(_) | ServerEvent::ResponseAudioTranscriptDone(_)
    )
}

fn is_transcript_event(event: &ServerEvent) -> bool {
    matches!(
        event,
        ServerEvent::ResponseAudioTranscriptDelta(_)
            | ServerEvent::ResponseAudioTranscriptDone(_)
            | ServerEvent::ConversationItemInputAudioTranscriptionCompleted(_)
    )
}

fn is_function_event(event: &ServerEvent) -> bool {
    matches!(event, ServerEvent::ResponseFunctionCallArgumentsDone(_))
}

fn is_lifecycle_event(event: &ServerEvent) -> bool {
    matches!(
        event,
        ServerEvent::SessionCreated(_)
            | ServerEvent::SessionUpdated(_)
            | ServerEvent::InputAudioBufferSpeechStarted(_)
            | ServerEvent::InputAudioBufferSpeechStopped(_)
            | ServerEvent::ResponseCreated(_)
            | ServerEvent::ResponseDone(_)
            | ServerEvent::Error(_)
            | ServerEvent::Close { .. }
    )
}

/// Extracts the trigger reason from tool-call arguments, which arrive
/// either as a structured object or as a JSON-encoded string. Anything
/// unparseable falls back to the fixed default.
fn parse_trigger_reason(arguments: &serde_json::Value, fallback: &str) -> String {
    let parsed = match arguments {
        serde_json::Value::Object(_) => Some(arguments.clone()),
        serde_json::Value::String(raw) => serde_json::from_str(raw).ok(),
        _ => None,
    };
    parsed
        .as_ref()
        .and_then(|value| value.get("reason"))
        .and_then(|reason| reason.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
