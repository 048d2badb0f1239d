//! Acknowledgment detection for user speech during assessment delivery.

/// Korean acknowledgment and farewell phrases.
const KOREAN_ACKNOWLEDGMENTS: &[&str] = &[
    "감사합니다",
    "감사",
    "고마워",
    "고맙습니다",
    "알겠습니다",
    "알겠어요",
    "알았어요",
    "안녕히",
    "안녕",
    "잘 가",
    "수고하세요",
    "좋아요",
    "괜찮아요",
];

/// English fallbacks, in case the user switches language.
const ENGLISH_ACKNOWLEDGMENTS: &[&str] = &[
    "thank",
    "thanks",
    "bye",
    "goodbye",
    "got it",
    "understand",
    "okay",
    "ok",
    "great",
    "good",
    "see you",
];

/// Case-insensitive substring match against the keyword lists; the first
/// match wins, there is no scoring.
pub fn is_acknowledgment(transcript: &str) -> bool {
    let normalized = transcript.to_lowercase();
    let normalized = normalized.trim();
    KOREAN_ACKNOWLEDGMENTS
        .iter()
        .chain(ENGLISH_ACKNOWLEDGMENTS)
        .any(|keyword| normalized.contains(keyword))
}
