pub mod client;
pub mod server;

use client::*;
use server::*;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate(SessionUpdateEvent),
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend(InputAudioBufferAppendEvent),
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit(InputAudioBufferCommitEvent),
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear(InputAudioBufferClearEvent),
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate(ConversationItemCreateEvent),
    #[serde(rename = "response.create")]
    ResponseCreate(ResponseCreateEvent),
    #[serde(rename = "response.cancel")]
    ResponseCancel(ResponseCancelEvent),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "close")]
    Close { reason: Option<String> },
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "session.created")]
    SessionCreated(SessionCreatedEvent),
    #[serde(rename = "session.updated")]
    SessionUpdated(SessionUpdatedEvent),
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted(InputAudioBufferSpeechStartedEvent),
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped(InputAudioBufferSpeechStoppedEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    ConversationItemInputAudioTranscriptionCompleted(
        ConversationItemInputAudioTranscriptionCompletedEvent,
    ),
    #[serde(rename = "response.created")]
    ResponseCreated(ResponseCreatedEvent),
    #[serde(rename = "response.done")]
    ResponseDone(ResponseDoneEvent),
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta(ResponseAudioDeltaEvent),
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta(ResponseAudioTranscriptDeltaEvent),
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone(ResponseAudioTranscriptDoneEvent),
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone(ResponseFunctionCallArgumentsDoneEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_audio_delta() {
        let json = r#"{
            "type": "response.audio.delta",
            "event_id": "ev_1",
            "response_id": "resp_1",
            "item_id": "item_1",
            "output_index": 0,
            "content_index": 0,
            "delta": "AQID"
        }"#;
        let event: ServerEvent = serde_json::from_str(json).expect("valid event");
        match event {
            ServerEvent::ResponseAudioDelta(delta) => {
                assert_eq!(delta.response_id(), "resp_1");
                assert_eq!(delta.delta(), "AQID");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn function_call_arguments_accept_string_and_object() {
        let as_string = r#"{
            "type": "response.function_call_arguments.done",
            "event_id": "ev_2",
            "response_id": "resp_2",
            "item_id": "item_2",
            "output_index": 0,
            "call_id": "call_1",
            "name": "trigger_assessment",
            "arguments": "{\"reason\": \"ceiling\"}"
        }"#;
        let as_object = r#"{
            "type": "response.function_call_arguments.done",
            "event_id": "ev_3",
            "response_id": "resp_3",
            "item_id": "item_3",
            "output_index": 0,
            "call_id": "call_2",
            "arguments": {"reason": "ceiling"}
        }"#;

        let from_string: ServerEvent = serde_json::from_str(as_string).expect("string arguments");
        let from_object: ServerEvent = serde_json::from_str(as_object).expect("object arguments");
        match (from_string, from_object) {
            (
                ServerEvent::ResponseFunctionCallArgumentsDone(s),
                ServerEvent::ResponseFunctionCallArgumentsDone(o),
            ) => {
                assert!(s.arguments().is_string());
                assert!(o.arguments().is_object());
                assert_eq!(s.name(), Some("trigger_assessment"));
                assert_eq!(o.name(), None);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn serializes_client_event_tag() {
        let event = ClientEvent::InputAudioBufferClear(InputAudioBufferClearEvent::new());
        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["type"], "input_audio_buffer.clear");
    }
}
