pub mod config;
pub mod dispatch;
pub mod error;
pub mod hash;
pub mod prepare;
pub mod reasoning;
pub mod record;
pub mod runner;
pub mod storage;
pub mod summary;
pub mod validators;

pub use config::{FileConfig, RunnerConfig};
pub use dispatch::{AttemptCounter, Dispatcher, RetryPolicy};
pub use error::{VerifierError, VerifierResult};
pub use hash::content_hash;
pub use prepare::{RequestPreparer, TestCase};
pub use reasoning::is_reasoning_only;
pub use record::{ErrorPayload, Outcome, ResponsePayload, ResultRecord, Status};
pub use runner::{RunReport, Runner};
pub use summary::Summary;
pub use validators::{
    ForbiddenScriptValidator, RepeatNGramConfig, RepeatNGramValidator, ToolCallsValidator,
    ValidationInput, Validator, ValidatorRegistry,
};
