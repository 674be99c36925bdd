// src/pipeline/stream.rs
use std::io::{self, Write};
use std::time::Instant;

use crate::capabilities::Capabilities;
use crate::error::ProcessingError;
use crate::input::RecordSource;
use crate::output;
use crate::pipeline::command::Step;
use crate::pipeline::config::{InputMode, PipelineConfig};
use crate::pipeline::context::{PipelineResult, ProcessingStats, Record};
use crate::pipeline::executor::StarlarkExecutor;

/// Main pipeline orchestrator
pub struct StreamPipeline {
    steps: Vec<Step>,
    executor: StarlarkExecutor,
    config: PipelineConfig,
    stats: ProcessingStats,
}

impl StreamPipeline {
    pub fn new(config: PipelineConfig, capabilities: Capabilities) -> Self {
        StreamPipeline {
            steps: Vec::new(),
            executor: StarlarkExecutor::new(capabilities),
            config,
            stats: ProcessingStats::default(),
        }
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.executor.capabilities()
    }

    /// Run the steps over a single record and hand the result back
    /// instead of printing it
    pub fn execute(&self, record: &Record) -> Result<PipelineResult, ProcessingError> {
        self.executor.execute(&record.text, record.index, &self.steps)
    }

    /// Process a whole input. Records are pulled one at a time: the next one
    /// is not read until the current one has been executed and written.
    /// The first failing record stops the run.
    pub fn process<W: Write>(
        &mut self,
        source: RecordSource,
        output: &mut W,
    ) -> Result<ProcessingStats, ProcessingError> {
        let start_time = Instant::now();
        let mut run_stats = ProcessingStats::default();

        let outcome = match self.config.mode {
            InputMode::Whole => {
                let record = source.whole()?;
                self.handle_record(&record, output, &mut run_stats).map(|_| ())
            }
            InputMode::Lines => {
                let mut outcome = Ok(());
                for record in source.records() {
                    let record = record?;
                    match self.handle_record(&record, output, &mut run_stats) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            outcome = Err(e);
                            break;
                        }
                    }
                }
                outcome
            }
        };

        run_stats.processing_time = start_time.elapsed();
        self.stats.records_processed += run_stats.records_processed;
        self.stats.records_output += run_stats.records_output;
        self.stats.records_skipped += run_stats.records_skipped;
        self.stats.processing_time += run_stats.processing_time;

        tracing::debug!(
            "processed {} records: {} output, {} skipped in {:?}",
            run_stats.records_processed,
            run_stats.records_output,
            run_stats.records_skipped,
            run_stats.processing_time
        );

        outcome.map(|_| run_stats)
    }

    /// Returns false when output can no longer be written
    fn handle_record<W: Write>(
        &self,
        record: &Record,
        output: &mut W,
        stats: &mut ProcessingStats,
    ) -> Result<bool, ProcessingError> {
        stats.records_processed += 1;

        match self.execute(record)? {
            PipelineResult::Produced(value) => {
                if let Err(e) = output::write_value(output, &value) {
                    if e.kind() == io::ErrorKind::BrokenPipe {
                        tracing::debug!("output closed at record {}", record.index);
                        return Ok(false);
                    }
                    return Err(e.into());
                }
                stats.records_output += 1;
            }
            PipelineResult::Discarded => {
                stats.records_skipped += 1;
            }
        }

        Ok(true)
    }

    /// Get current accumulated stats
    pub fn get_stats(&self) -> &ProcessingStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Encoding;
    use std::io::Cursor;

    fn source(text: &'static str) -> RecordSource {
        RecordSource::from_reader(Box::new(Cursor::new(text.as_bytes())), Encoding::Utf8)
    }

    fn pipeline(mode: InputMode, steps: &[&str]) -> StreamPipeline {
        let config = PipelineConfig {
            mode,
            ..PipelineConfig::default()
        };
        let mut pipeline = StreamPipeline::new(config, Capabilities::new());
        for step in steps {
            pipeline.add_step(Step::transform(step).unwrap());
        }
        pipeline
    }

    #[test]
    fn test_line_mode_keeps_order() {
        let mut pipeline = pipeline(InputMode::Lines, &["data + \"@\" + str(index)"]);
        let mut output = Vec::new();

        let stats = pipeline.process(source("1\n2\n3\n4\n5\n"), &mut output).unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "1@1\n2@2\n3@3\n4@4\n5@5\n");
        assert_eq!(stats.records_processed, 5);
        assert_eq!(stats.records_output, 5);
    }

    #[test]
    fn test_whole_mode_is_one_record() {
        let mut pipeline = pipeline(InputMode::Whole, &["data.replace(\"\\n\", \",\") + \"@\" + str(index)"]);
        let mut output = Vec::new();

        let stats = pipeline.process(source("1\n2\n3"), &mut output).unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "1,2,3@0\n");
        assert_eq!(stats.records_processed, 1);
    }

    #[test]
    fn test_filtered_records_are_counted() {
        let mut pipeline = pipeline(InputMode::Lines, &[]);
        pipeline.add_step(Step::filter("index > 2").unwrap());
        let mut output = Vec::new();

        let stats = pipeline.process(source("a\nb\nc\nd\n"), &mut output).unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "c\nd\n");
        assert_eq!(stats.records_skipped, 2);
        assert_eq!(pipeline.get_stats().records_output, 2);
    }

    #[test]
    fn test_error_stops_run_but_keeps_earlier_output() {
        let mut pipeline = pipeline(InputMode::Lines, &["100 // int(data)"]);
        let mut output = Vec::new();

        let err = pipeline.process(source("5\n0\n4\n"), &mut output).unwrap_err();

        assert!(err.to_string().starts_with("Invalid command \"100 // int(data)\""));
        assert_eq!(String::from_utf8(output).unwrap(), "20\n");
    }

    #[test]
    fn test_execute_returns_result_to_caller() {
        let pipeline = pipeline(InputMode::Lines, &[".upper()"]);
        let result = pipeline.execute(&Record::new("abc".into(), 1)).unwrap();
        assert_eq!(
            result,
            PipelineResult::Produced(crate::pipeline::context::OutputValue::Text("ABC".into()))
        );
    }
}
