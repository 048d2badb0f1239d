//! Interview Configuration
//!
//! All static prompt text and delivery tunables live in one explicitly
//! constructed value, built once at session start and passed by reference
//! into the components that need it.

use std::time::Duration;

use tutor_realtime_types::audio::{
    AudioFormat, InputAudioTranscription, ServerVadTurnDetection, TurnDetection, Voice,
};
use tutor_realtime_types::tools::{Tool, ToolChoice};
use tutor_realtime_types::Session;

/// Function the model calls when the user has reached their ceiling.
pub const TRIGGER_FUNCTION: &str = "trigger_assessment";

/// Bounded wait for the acknowledgment audio to finish.
pub const ACK_AUDIO_TIMEOUT: Duration = Duration::from_secs(10);
/// Bounded wait for the summary audio to finish.
pub const SUMMARY_AUDIO_TIMEOUT: Duration = Duration::from_secs(20);
/// Bounded wait for the goodbye audio to finish.
pub const GOODBYE_AUDIO_TIMEOUT: Duration = Duration::from_secs(10);
/// Fixed drain after the goodbye audio before ending the session.
pub const GOODBYE_DRAIN: Duration = Duration::from_secs(3);
/// Safety margin added to the computed playback drain delay.
pub const DRAIN_SAFETY_MARGIN_SECS: f64 = 3.0;
/// Grace period for background tasks during session teardown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Static prompt text spoken or injected during the interview.
#[derive(Debug, Clone)]
pub struct Prompts {
    /// System instructions for the interviewer model.
    pub system_instructions: String,
    /// Tool output instructing the model to acknowledge the trigger.
    pub ack_instruction: String,
    /// Fixed goodbye utterance closing the session.
    pub goodbye_message: String,
    /// Spoken when report generation fails.
    pub apology_message: String,
    /// Used when the trigger call carries no parseable reason.
    pub fallback_trigger_reason: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            system_instructions: SYSTEM_INSTRUCTIONS.to_string(),
            ack_instruction: ACK_INSTRUCTION.to_string(),
            goodbye_message: GOODBYE_MESSAGE.to_string(),
            apology_message: APOLOGY_MESSAGE.to_string(),
            fallback_trigger_reason: "Linguistic ceiling reached".to_string(),
        }
    }
}

/// Holds all configuration for one interview session.
#[derive(Debug, Clone)]
pub struct InterviewConfig {
    pub voice: Voice,
    /// Language hint for input transcription.
    pub transcription_language: String,
    pub temperature: f32,
    /// Attempts for the report-generation call. 1 means no retry.
    pub max_report_attempts: u32,
    pub prompts: Prompts,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            voice: Voice::Marin,
            transcription_language: "ko".to_string(),
            temperature: 0.8,
            max_report_attempts: 1,
            prompts: Prompts::default(),
        }
    }
}

impl InterviewConfig {
    /// Builds the `session.update` payload for the start of the interview,
    /// including the assessment trigger tool.
    pub fn initial_session(&self) -> Session {
        let trigger_parameters = serde_json::json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Brief reason for triggering assessment (e.g., 'User reached ceiling at B1 level')"
                }
            },
            "required": ["reason"]
        });

        Session::new()
            .with_modalities_enable_audio()
            .with_instructions(&self.prompts.system_instructions)
            .with_voice(self.voice)
            .with_input_audio_format(AudioFormat::Pcm16)
            .with_output_audio_format(AudioFormat::Pcm16)
            .with_input_audio_transcription(
                InputAudioTranscription::whisper().with_language(&self.transcription_language),
            )
            .with_turn_detection(TurnDetection::ServerVad(ServerVadTurnDetection::default()))
            .with_tool(Tool::function(
                TRIGGER_FUNCTION,
                "MANDATORY: Call this function when the user has reached their linguistic \
                 ceiling (stopped being comfortable). This triggers the assessment agent to \
                 analyze the interview. DO NOT provide assessment yourself.",
                trigger_parameters,
            ))
            .with_tool_choice(ToolChoice::Auto)
            .with_temperature(self.temperature)
    }
}

const SYSTEM_INSTRUCTIONS: &str = "\
You are a friendly, casual AI Korean language interviewer. Your goal is to conduct a \
less than 5-minute voice-based interview in Korean to determine the user's CEFR level.

# Core Guidelines:
- Tone: Friendly, casual, and supportive, like talking to a friend.
- Language: Korean only.
- Framework: Use the CEFR (A1-C1) guideline for leveling and the Communicative Approach \
for assessment.
- Method: a semi-structured oral interview.

# Assessment Protocol (Scaling Difficulty):
1. Warm-up (A1): Start with very simple personal questions (e.g., name, hometown).
2. Level Up (A2-B1): Transition to open-ended questions requiring description or narration.
3. Probe the Ceiling (C1): Ask for supported opinions on abstract topics.
- Difficulty Scaling: Increase difficulty gradually. Do not jump abruptly from A1 to C1.
- Keep the language used in your questions appropriate for the intended CEFR level.

# CRITICAL ENDING INSTRUCTION:
When the user has reached their linguistic ceiling (stopped being comfortable), you MUST \
call the trigger_assessment function. This hands the interview over to the assessment \
agent. DO NOT provide the assessment yourself.";

const ACK_INSTRUCTION: &str = "\
Assessment triggered successfully. Please IMMEDIATELY tell the user in Korean: \
'평가를 준비하고 있습니다. 잠시만 기다려 주세요.' \
(Your assessment is being prepared. Please wait a moment.)";

const GOODBYE_MESSAGE: &str = "\
Thank you for completing the interview! Keep practicing, and you'll continue to \
improve. Goodbye!";

const APOLOGY_MESSAGE: &str = "\
I'm sorry, something went wrong while preparing your assessment report. Please end \
the session and start a new interview.";
