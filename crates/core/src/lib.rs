pub mod assessor;
pub mod audio;
pub mod config;
pub mod delivery;
pub mod keywords;
pub mod outbound;
pub mod report;
pub mod router;
pub mod session;
pub mod state_machine;
pub mod supervisor;

pub use config::InterviewConfig;
pub use router::EventRouter;
pub use session::{SessionHandle, start_session};
pub use state_machine::{AssessmentPhase, AssessmentStateMachine, ResponsePhase};
