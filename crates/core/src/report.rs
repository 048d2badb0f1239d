//! Structured proficiency report and its spoken rendering.

/// Analysis of one linguistic domain (fluency, grammar, lexical range,
/// phonology, coherence).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DomainAnalysis {
    pub domain: String,
    /// 1 to 5.
    pub rating: u8,
    pub observation: String,
    /// Direct quote from the learner's transcript.
    pub evidence: String,
}

/// Assessment report produced by the examiner collaborator.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AssessmentReport {
    /// CEFR level, e.g. "B1".
    pub proficiency_level: String,
    /// Interview phase where the breakdown occurred (warm-up, level-up,
    /// probe).
    pub ceiling_phase: String,
    pub ceiling_analysis: String,
    pub domain_analyses: Vec<DomainAnalysis>,
    /// Recommended curriculum starting point.
    pub starting_module: String,
    /// Top grammatical or lexical patterns to fix.
    pub error_patterns: Vec<String>,
    /// One specific practice exercise.
    pub practice_strategy: String,
}

impl AssessmentReport {
    /// Renders the report as a conversational summary suitable for speech.
    /// Deterministic: the same report always yields the same text.
    pub fn verbal_summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.push(format!(
            "Based on our conversation, I've assessed your Korean proficiency at {} level.",
            self.proficiency_level
        ));
        parts.push(format!(
            "You performed well during the {} phase. {}",
            self.ceiling_phase, self.ceiling_analysis
        ));

        if let (Some(strongest), Some(weakest)) = (
            self.domain_analyses.iter().max_by_key(|d| d.rating),
            self.domain_analyses.iter().min_by_key(|d| d.rating),
        ) {
            parts.push("Let me break down the key areas:".to_string());
            parts.push(format!(
                "Your strongest area is {} with a rating of {} out of 5. {}",
                strongest.domain.to_lowercase(),
                strongest.rating,
                strongest.observation
            ));
            parts.push(format!(
                "An area to focus on is {}, rated at {} out of 5. {}",
                weakest.domain.to_lowercase(),
                weakest.rating,
                weakest.observation
            ));
        }

        parts.push(format!(
            "I recommend starting with the {} module.",
            self.starting_module
        ));
        if !self.error_patterns.is_empty() {
            parts.push("The top patterns to work on are:".to_string());
            for (index, pattern) in self.error_patterns.iter().enumerate() {
                parts.push(format!("{}. {}", index + 1, pattern));
            }
        }
        parts.push(format!(
            "For practice, I suggest this exercise: {}",
            self.practice_strategy
        ));
        parts.push("You're making good progress! Keep practicing regularly.".to_string());

        parts.join(" ")
    }
}
