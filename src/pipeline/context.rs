use std::time::Duration;

/// One unit of input: the whole input (index 0) or one line (index from 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub text: String,
    pub index: usize,
}

impl Record {
    pub fn new(text: String, index: usize) -> Self {
        Record { text, index }
    }
}

/// A value leaving the pipeline, already detached from the Starlark heap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputValue {
    /// The script produced `None`
    Missing,
    Text(String),
}

/// Result of running the steps over a single record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    Produced(OutputValue),
    /// A filter dropped the record; nothing is printed
    Discarded,
}

/// Runtime statistics
#[derive(Debug, Default, Clone)]
pub struct ProcessingStats {
    pub records_processed: usize,
    pub records_output: usize,
    pub records_skipped: usize,
    pub processing_time: Duration,
}
