//! Session state shared between the event router and the delivery
//! orchestrator, plus the wiring that starts one interview session.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tutor_realtime_types::events::server::Usage;

use crate::assessor::{Assessor, ReportStore};
use crate::config::{InterviewConfig, SHUTDOWN_GRACE};
use crate::delivery::DeliveryOrchestrator;
use crate::outbound::{AudioTx, OutboundTx};
use crate::router::EventRouter;
use crate::state_machine::AssessmentStateMachine;
use crate::supervisor::TaskSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Speaker {
    Interviewer,
    Learner,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interviewer => f.write_str("Interviewer"),
            Self::Learner => f.write_str("Learner"),
        }
    }
}

/// One utterance of the interview transcript.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// Token usage accumulated over the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    pub total_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Per-session conversation state.
pub struct InterviewSession {
    session_id: String,
    history: Vec<ConversationTurn>,
    transcript_buffer: String,
    usage: UsageTotals,
}

impl Default for InterviewSession {
    fn default() -> Self {
        Self::new()
    }
}

impl InterviewSession {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            history: Vec::new(),
            transcript_buffer: String::new(),
            usage: UsageTotals::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn add_turn(&mut self, speaker: Speaker, text: &str) {
        self.history.push(ConversationTurn {
            speaker,
            text: text.to_string(),
        });
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn history_snapshot(&self) -> Vec<ConversationTurn> {
        self.history.clone()
    }

    pub fn push_transcript_delta(&mut self, delta: &str) {
        self.transcript_buffer.push_str(delta);
    }

    /// Flushes the accumulated transcript as one logical utterance.
    pub fn take_transcript(&mut self) -> String {
        std::mem::take(&mut self.transcript_buffer)
    }

    pub fn add_usage(&mut self, usage: &Usage) {
        self.usage.total_tokens += usage.total_tokens();
        self.usage.input_tokens += usage.input_tokens();
        self.usage.output_tokens += usage.output_tokens();
    }

    pub fn usage(&self) -> UsageTotals {
        self.usage
    }
}

/// Owner of a running session's background work and end-of-session signal.
pub struct SessionHandle {
    end_signal: CancellationToken,
    supervisor: TaskSupervisor,
}

impl SessionHandle {
    /// Resolves when the delivery orchestrator (or an early user
    /// acknowledgment) requests session termination.
    pub async fn ended(&self) {
        self.end_signal.cancelled().await;
    }

    pub fn end_signal(&self) -> &CancellationToken {
        &self.end_signal
    }

    /// Cancels and awaits background work within the shutdown grace period.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown(SHUTDOWN_GRACE).await;
    }
}

/// Wires up one interview session: the state machine, the shared session
/// state, the delivery orchestrator running under the session supervisor,
/// and the event router fed by the transport collaborator.
pub fn start_session(
    config: Arc<InterviewConfig>,
    assessor: Arc<dyn Assessor + Send + Sync>,
    store: Arc<dyn ReportStore + Send + Sync>,
    outbound: OutboundTx,
    audio_out: AudioTx,
) -> (EventRouter, SessionHandle) {
    let machine = Arc::new(AssessmentStateMachine::new());
    let session = Arc::new(Mutex::new(InterviewSession::new()));
    let supervisor = TaskSupervisor::new();
    let end_signal = CancellationToken::new();
    let (delivery_tx, delivery_rx) = mpsc::channel(32);

    tracing::info!(
        "starting interview session {}",
        session.lock().map(|s| s.session_id().to_string()).unwrap_or_default()
    );

    let orchestrator = DeliveryOrchestrator::new(
        machine.clone(),
        session.clone(),
        config.clone(),
        assessor,
        store,
        outbound.clone(),
        supervisor.cancel_token(),
        end_signal.clone(),
    );
    supervisor.spawn(orchestrator.run(delivery_rx));

    let router = EventRouter::new(
        machine,
        session,
        config,
        outbound,
        audio_out,
        delivery_tx,
        end_signal.clone(),
    );

    (
        router,
        SessionHandle {
            end_signal,
            supervisor,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessor::{MockAssessor, MockReportStore};
    use crate::report::{AssessmentReport, DomainAnalysis};
    use crate::state_machine::AssessmentPhase;
    use base64::Engine;
    use std::time::Duration;
    use tutor_realtime_types::{ClientEvent, ServerEvent};

    #[test]
    fn transcript_buffer_flushes_once() {
        let mut session = InterviewSession::new();
        session.push_transcript_delta("안녕");
        session.push_transcript_delta("하세요");
        assert_eq!(session.take_transcript(), "안녕하세요");
        assert_eq!(session.take_transcript(), "");
    }

    #[test]
    fn history_records_turns_in_order() {
        let mut session = InterviewSession::new();
        session.add_turn(Speaker::Interviewer, "이름이 뭐예요?");
        session.add_turn(Speaker::Learner, "알렉스예요");
        let history = session.history();
        assert_eq!(history[0].speaker, Speaker::Interviewer);
        assert_eq!(history[1].speaker, Speaker::Learner);
    }

    fn server_event(json: &str) -> ServerEvent {
        serde_json::from_str(json).expect("valid test event")
    }

    fn response_created(response_id: &str) -> ServerEvent {
        server_event(&format!(
            r#"{{"type": "response.created", "event_id": "ev",
                 "response": {{"id": "{response_id}"}}}}"#
        ))
    }

    fn response_done(response_id: &str) -> ServerEvent {
        server_event(&format!(
            r#"{{"type": "response.done", "event_id": "ev",
                 "response": {{"id": "{response_id}", "status": "completed"}}}}"#
        ))
    }

    fn audio_delta(response_id: &str, bytes: &[u8]) -> ServerEvent {
        let delta = base64::engine::general_purpose::STANDARD.encode(bytes);
        server_event(&format!(
            r#"{{"type": "response.audio.delta", "event_id": "ev",
                 "response_id": "{response_id}", "item_id": "item",
                 "output_index": 0, "content_index": 0, "delta": "{delta}"}}"#
        ))
    }

    fn transcript_done(response_id: &str) -> ServerEvent {
        server_event(&format!(
            r#"{{"type": "response.audio_transcript.done", "event_id": "ev",
                 "response_id": "{response_id}", "item_id": "item",
                 "output_index": 0, "content_index": 0, "transcript": "done"}}"#
        ))
    }

    fn user_said(text: &str) -> ServerEvent {
        server_event(&format!(
            r#"{{"type": "conversation.item.input_audio_transcription.completed",
                 "event_id": "ev", "item_id": "item", "content_index": 0,
                 "transcript": "{text}"}}"#
        ))
    }

    fn trigger_call() -> ServerEvent {
        server_event(
            r#"{"type": "response.function_call_arguments.done", "event_id": "ev",
                "response_id": "resp_fn", "item_id": "item", "output_index": 0,
                "call_id": "call_1", "name": "trigger_assessment",
                "arguments": {"reason": "ceiling B1"}}"#,
        )
    }

    fn sample_report() -> AssessmentReport {
        AssessmentReport {
            proficiency_level: "B1".to_string(),
            ceiling_phase: "Level-up".to_string(),
            ceiling_analysis: "Narration broke down.".to_string(),
            domain_analyses: vec![DomainAnalysis {
                domain: "Fluency".to_string(),
                rating: 3,
                observation: "Steady pace.".to_string(),
                evidence: "주말에 친구를 만났어요".to_string(),
            }],
            starting_module: "Intermediate Conversation".to_string(),
            error_patterns: vec!["Past tense endings".to_string()],
            practice_strategy: "Shadowing".to_string(),
        }
    }

    async fn recv_outbound(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("outbound event before timeout")
            .expect("outbound channel open")
    }

    fn instructions_of(event: &ClientEvent) -> String {
        match event {
            ClientEvent::ResponseCreate(create) => create
                .response()
                .and_then(|r| r.instructions())
                .expect("response instructions")
                .to_string(),
            other => panic!("expected response.create, got {other:?}"),
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[tokio::test(start_paused = true)]
    async fn full_session_runs_the_delivery_script_end_to_end() {
        init_tracing();
        let mut assessor = MockAssessor::new();
        assessor.expect_generate_report().times(1).returning(|transcript| {
            assert!(!transcript.is_empty());
            let report = sample_report();
            Box::pin(async move { Ok(report) })
        });
        let mut store = MockReportStore::new();
        store
            .expect_persist()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let (outbound_tx, mut outbound_rx) = mpsc::channel(32);
        let (audio_tx, mut audio_rx) = mpsc::channel(128);
        let (mut router, handle) = start_session(
            Arc::new(InterviewConfig::default()),
            Arc::new(assessor),
            Arc::new(store),
            outbound_tx,
            audio_tx,
        );

        // Ordinary conversation before the trigger.
        router.dispatch(&user_said("저는 학생입니다")).await;

        // The model decides the ceiling is reached.
        router.dispatch(&trigger_call()).await;
        assert!(matches!(
            recv_outbound(&mut outbound_rx).await,
            ClientEvent::InputAudioBufferClear(_)
        ));
        assert!(matches!(
            recv_outbound(&mut outbound_rx).await,
            ClientEvent::ConversationItemCreate(_)
        ));
        assert!(matches!(
            recv_outbound(&mut outbound_rx).await,
            ClientEvent::ResponseCreate(_)
        ));

        // Acknowledgment response.
        router.dispatch(&response_created("r1")).await;
        router.dispatch(&audio_delta("r1", &[0u8; 9_600])).await;
        assert_eq!(router.machine().phase(), AssessmentPhase::AckSpeaking);
        assert!(audio_rx.recv().await.is_some());
        router.dispatch(&transcript_done("r1")).await;
        router.dispatch(&response_done("r1")).await;

        // The orchestrator generates the report and asks for the summary
        // to be spoken.
        let summary = recv_outbound(&mut outbound_rx).await;
        assert!(instructions_of(&summary).contains("B1 level"));

        // Summary response.
        router.dispatch(&response_created("r2")).await;
        assert_eq!(router.machine().phase(), AssessmentPhase::SummarySending);
        router.dispatch(&audio_delta("r2", &[0u8; 48_000])).await;
        assert_eq!(router.machine().phase(), AssessmentPhase::SummarySpeaking);
        router.dispatch(&transcript_done("r2")).await;
        router.dispatch(&response_done("r2")).await;

        let goodbye = recv_outbound(&mut outbound_rx).await;
        assert!(instructions_of(&goodbye).contains("Goodbye"));

        // Goodbye response.
        router.dispatch(&response_created("r3")).await;
        assert_eq!(router.machine().phase(), AssessmentPhase::GoodbyeSending);
        router.dispatch(&audio_delta("r3", &[0u8; 4_800])).await;
        router.dispatch(&transcript_done("r3")).await;
        router.dispatch(&response_done("r3")).await;

        tokio::time::timeout(Duration::from_secs(60), handle.ended())
            .await
            .expect("session end signalled");
        assert!(router.machine().is_complete());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn early_acknowledgment_preempts_the_remaining_script() {
        let mut assessor = MockAssessor::new();
        assessor.expect_generate_report().returning(|_| {
            let report = sample_report();
            Box::pin(async move { Ok(report) })
        });
        let mut store = MockReportStore::new();
        store
            .expect_persist()
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let (outbound_tx, mut outbound_rx) = mpsc::channel(32);
        let (audio_tx, _audio_rx) = mpsc::channel(128);
        let (mut router, handle) = start_session(
            Arc::new(InterviewConfig::default()),
            Arc::new(assessor),
            Arc::new(store),
            outbound_tx,
            audio_tx,
        );

        router.dispatch(&user_said("네 저는 회사원이에요")).await;
        router.dispatch(&trigger_call()).await;
        while outbound_rx.try_recv().is_ok() {}

        router.dispatch(&response_created("r1")).await;
        router.dispatch(&audio_delta("r1", &[0u8; 4_800])).await;

        // The user says thanks mid-acknowledgment.
        router.dispatch(&user_said("감사합니다")).await;

        tokio::time::timeout(Duration::from_secs(5), handle.ended())
            .await
            .expect("session end signalled");
        assert!(router.machine().is_complete());

        handle.shutdown().await;
    }
}
