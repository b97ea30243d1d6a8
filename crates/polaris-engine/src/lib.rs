pub mod error;
pub mod job;
pub mod prompt;
pub mod registry;
pub mod router;
pub mod steps;
pub mod tools;
pub mod truncate;

pub use error::EngineError;
pub use job::{JobConfig, MessageJob, APOLOGY_MESSAGE};
pub use registry::ToolRegistry;
pub use router::{AgentRouter, RouterConfig, RouterOutcome, RouterState};
pub use steps::{MemoryJournal, RetryPolicy, StepJournal, StepRunner};
pub use tools::FileToolset;
