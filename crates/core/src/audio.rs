use base64::Engine;

/// Decodes a base64 audio delta into raw PCM bytes for playback.
///
/// Samples are 16-bit, so an odd-length payload is malformed; it is
/// zero-padded to the next even length rather than rejected. An undecodable
/// payload yields an empty buffer.
pub fn decode_audio_delta(delta: &str) -> Vec<u8> {
    let mut bytes = match base64::engine::general_purpose::STANDARD.decode(delta) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("failed to decode audio delta: {e}");
            return Vec::new();
        }
    };
    if bytes.len() % 2 != 0 {
        tracing::warn!("received odd-length audio chunk: {} bytes", bytes.len());
        bytes.push(0);
    }
    bytes
}
