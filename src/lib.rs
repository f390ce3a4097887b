pub mod config;
pub mod error;
pub mod executer;
pub mod generator;
pub mod http;
pub mod logger;
pub mod operators;
pub mod output;
pub mod plan;
pub mod progress;
pub mod ratelimit;

// Re-export commonly used types
pub use config::ExecuterOptions;
pub use error::{ExecError, Result, ResultExt};
pub use executer::{ExecuterBuilder, ExecutionResult, HttpExecuter};
