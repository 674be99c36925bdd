// src/lib.rs
pub mod capabilities;
pub mod error;
pub mod input;
pub mod output;
pub mod pipeline;

pub use error::*;

pub use capabilities::Capabilities;
pub use input::{Encoding, Input, RecordSource};
pub use pipeline::command::{rewrite_command, Command, Step, StepKind};
pub use pipeline::config::{InputMode, PipelineConfig};
pub use pipeline::context::{OutputValue, PipelineResult, ProcessingStats, Record};
pub use pipeline::executor::StarlarkExecutor;
pub use pipeline::stream::StreamPipeline;
