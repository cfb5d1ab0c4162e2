pub mod analysis;
pub mod chat;
pub mod error;
pub mod events;
pub mod media;
pub mod models;
pub mod prompt;
pub mod submission;

pub use analysis::{AnalysisResult, Citation, Coordinates};
pub use error::SpotError;
pub use media::{CandidateFile, MediaItem, MediaType, PreviewLedger};
pub use prompt::{build_prompt, BuiltPrompt, SYSTEM_INSTRUCTION};
pub use submission::{BatchOutcome, InputMode, SubmissionState};
