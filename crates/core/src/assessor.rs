//! Contracts for the assessment collaborators.
//!
//! Report generation is an opaque remote call from this crate's
//! perspective, and report persistence is a storage side effect. Both are
//! expressed as traits so the session logic can be driven against mocks.

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::report::AssessmentReport;
use crate::session::ConversationTurn;

/// Produces a structured proficiency report from the interview transcript.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait Assessor {
    async fn generate_report(&self, transcript: &[ConversationTurn]) -> Result<AssessmentReport>;
}

/// Durable storage for completed reports. Invoked once per assessment;
/// failures are logged and non-fatal.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait ReportStore {
    async fn persist(&self, report: &AssessmentReport, verbal_summary: &str) -> Result<()>;
}
