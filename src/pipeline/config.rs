use crate::input::Encoding;

/// How input is split into records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputMode {
    /// One record per line
    #[default]
    Lines,
    /// The entire input is a single record
    Whole,
}

/// Configuration for pipeline behavior
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: InputMode,
    pub encoding: Encoding,
    pub buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            mode: InputMode::Lines,
            encoding: Encoding::Utf8,
            buffer_size: 65536, // 64KB
        }
    }
}
