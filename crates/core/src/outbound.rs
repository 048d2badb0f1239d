//! Construction of outbound control messages.
//!
//! Sending is fire-and-forget over an mpsc channel drained by the transport
//! collaborator; delivery confirmation is never awaited inline.

use tutor_realtime_types::events::client::{
    ConversationItemCreateEvent, InputAudioBufferClearEvent, ResponseCreateEvent,
    SessionUpdateEvent,
};
use tutor_realtime_types::content::FunctionCallOutputItem;
use tutor_realtime_types::{ClientEvent, Item, Session};

/// Channel carrying outbound protocol events to the transport collaborator.
pub type OutboundTx = tokio::sync::mpsc::Sender<ClientEvent>;

/// Channel carrying decoded PCM bytes to the playback collaborator.
pub type AudioTx = tokio::sync::mpsc::Sender<Vec<u8>>;

const ENGLISH_PREFIX: &str = "Speak this in natural American English pronunciation: ";
const KOREAN_PREFIX: &str = "Speak this in Korean: ";
const NEUTRAL_PREFIX: &str = "Speak this naturally: ";

/// Share of ASCII characters above which text is assumed to be English.
const ASCII_RATIO_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageHint {
    English,
    Korean,
    /// Detect from the text itself.
    Auto,
}

fn ascii_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let ascii = text.chars().filter(char::is_ascii).count();
    ascii as f64 / total as f64
}

/// Builds the instruction that directs the model to speak the exact text,
/// prefixed with a pronunciation hint for the resolved language.
pub fn speech_instruction(text: &str, hint: LanguageHint) -> String {
    let prefix = match hint {
        LanguageHint::English => ENGLISH_PREFIX,
        LanguageHint::Korean => KOREAN_PREFIX,
        LanguageHint::Auto => {
            if ascii_ratio(text) > ASCII_RATIO_THRESHOLD {
                ENGLISH_PREFIX
            } else {
                NEUTRAL_PREFIX
            }
        }
    };
    format!("{prefix}{text}")
}

/// Applies a session configuration, typically the initial one built by
/// `InterviewConfig::initial_session`.
pub fn session_update(session: Session) -> ClientEvent {
    ClientEvent::SessionUpdate(SessionUpdateEvent::new(session))
}

pub fn clear_input_buffer() -> ClientEvent {
    ClientEvent::InputAudioBufferClear(InputAudioBufferClearEvent::new())
}

/// Feeds a tool result back to the model as a conversation item.
pub fn tool_output(call_id: &str, output: &str) -> ClientEvent {
    ClientEvent::ConversationItemCreate(ConversationItemCreateEvent::new(
        Item::FunctionCallOutput(FunctionCallOutputItem::new(call_id, output)),
    ))
}

/// Requests a plain follow-up response from the model.
pub fn create_response() -> ClientEvent {
    ClientEvent::ResponseCreate(ResponseCreateEvent::new())
}

/// Requests a response whose instructions direct the model to speak the
/// given text verbatim.
pub fn spoken_response(text: &str, hint: LanguageHint) -> ClientEvent {
    let response = Session::new()
        .with_modalities_enable_audio()
        .with_instructions(&speech_instruction(text, hint));
    ClientEvent::ResponseCreate(ResponseCreateEvent::new().with_response(response))
}
