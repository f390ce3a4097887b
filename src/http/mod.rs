pub mod client;
pub mod headers;
pub mod pipeline;
pub mod raw;
pub mod request;
pub mod response;
pub mod types;
pub mod wire;

// Re-export commonly used types for convenient access
pub use client::{ClientSettings, StandardClient};
pub use headers::CustomHeaders;
pub use pipeline::{PipelineClient, PipelineOptions};
pub use raw::RawClient;
pub use request::{HttpRequest, Transmission};
pub use response::Response;
pub use types::Status;
