// src/pipeline/executor.rs - runs the steps over one record
use starlark::environment::Module;
use starlark::eval::Evaluator;
use starlark::syntax::Dialect;
use starlark::values::Value;

use crate::capabilities::Capabilities;
use crate::error::ProcessingError;
use crate::pipeline::command::{Command, Step, StepKind, DATA_VAR, INDEX_VAR};
use crate::pipeline::context::{OutputValue, PipelineResult};
use crate::pipeline::global_functions::reset_last_match;

/// Starlark dialect used for every expression and source file
pub(crate) fn dialect() -> Dialect {
    Dialect {
        enable_f_strings: true,
        ..Dialect::Extended
    }
}

/// Evaluates a step list against records, one record at a time
pub struct StarlarkExecutor {
    capabilities: Capabilities,
}

impl StarlarkExecutor {
    pub fn new(capabilities: Capabilities) -> Self {
        StarlarkExecutor { capabilities }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Thread `record` through `steps`. Each record gets a fresh module, so
    /// nothing from one record (values, regex groups) is visible to the next.
    pub fn execute(
        &self,
        record: &str,
        index: usize,
        steps: &[Step],
    ) -> Result<PipelineResult, ProcessingError> {
        reset_last_match();

        let module = Module::new();
        self.capabilities.load_into(&module);

        let heap = module.heap();
        let index_value = heap.alloc(index);
        let mut current = heap.alloc(record);

        for (position, step) in steps.iter().enumerate() {
            let result = self.evaluate(&module, step, current, index, index_value)?;

            match step.kind {
                StepKind::Transform | StepKind::Function => current = result,
                StepKind::Filter => {
                    if !result.to_bool() {
                        tracing::debug!("record {}: filtered out by step {}", index, position + 1);
                        return Ok(PipelineResult::Discarded);
                    }
                }
                StepKind::ReverseFilter => {
                    if result.to_bool() {
                        tracing::debug!("record {}: filtered out by step {}", index, position + 1);
                        return Ok(PipelineResult::Discarded);
                    }
                }
            }
        }

        Ok(PipelineResult::Produced(to_output_value(current)))
    }

    fn evaluate<'v>(
        &self,
        module: &'v Module,
        step: &Step,
        current: Value<'v>,
        index: usize,
        index_value: Value<'v>,
    ) -> Result<Value<'v>, ProcessingError> {
        module.set(DATA_VAR, current);
        module.set(INDEX_VAR, index_value);

        match &step.command {
            Command::Expression { text, ast } => {
                let mut eval = Evaluator::new(module);
                eval.eval_module(ast.clone(), self.capabilities.globals())
                    .map_err(|e| ProcessingError::from_starlark(text, &e))
            }
            Command::Script { path, function } => {
                let function = function.owned_value(module.frozen_heap());
                let mut eval = Evaluator::new(module);
                eval.eval_function(function, &[current, index_value], &[])
                    .map_err(|e| ProcessingError::from_starlark(path, &e))
            }
            Command::Native { name, function } => {
                let text = match to_output_value(current) {
                    OutputValue::Text(text) => text,
                    OutputValue::Missing => String::new(),
                };
                let result = function(&text, index)
                    .map_err(|e| ProcessingError::invalid_step(name, "Error", e.to_string()))?;
                Ok(module.heap().alloc(result))
            }
        }
    }
}

/// Detach a value from the heap: strings as-is, `None` as missing,
/// everything else in its `str()` form.
fn to_output_value(value: Value) -> OutputValue {
    if value.is_none() {
        OutputValue::Missing
    } else if let Some(s) = value.unpack_str() {
        OutputValue::Text(s.to_string())
    } else {
        OutputValue::Text(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn produced(text: &str) -> PipelineResult {
        PipelineResult::Produced(OutputValue::Text(text.to_string()))
    }

    fn executor() -> StarlarkExecutor {
        StarlarkExecutor::new(Capabilities::new())
    }

    #[test]
    fn test_transforms_compose_in_order() {
        let steps = vec![
            Step::transform("data[1]").unwrap(),
            Step::transform("data + str(index)").unwrap(),
        ];
        assert_eq!(executor().execute("abc", 0, &steps).unwrap(), produced("b0"));
    }

    #[test]
    fn test_native_function_step() {
        let steps = vec![
            Step::native("second", |data, _| Ok(data.chars().nth(1).map(String::from).unwrap_or_default())),
            Step::transform("data + str(index)").unwrap(),
        ];
        assert_eq!(executor().execute("abc", 0, &steps).unwrap(), produced("b0"));
    }

    #[test]
    fn test_filter() {
        let steps = vec![Step::filter("index < 2").unwrap()];
        assert_eq!(executor().execute("abc", 1, &steps).unwrap(), produced("abc"));
        assert_eq!(executor().execute("abc", 3, &steps).unwrap(), PipelineResult::Discarded);
    }

    #[test]
    fn test_reverse_filter() {
        let steps = vec![Step::reverse_filter("index < 2").unwrap()];
        assert_eq!(executor().execute("abc", 1, &steps).unwrap(), PipelineResult::Discarded);
        assert_eq!(executor().execute("abc", 3, &steps).unwrap(), produced("abc"));
    }

    #[test]
    fn test_filter_keeps_current_value() {
        let steps = vec![
            Step::transform(".upper()").unwrap(),
            Step::filter("len(data)").unwrap(),
            Step::reverse_filter("False").unwrap(),
        ];
        assert_eq!(executor().execute("abc", 1, &steps).unwrap(), produced("ABC"));
    }

    #[test]
    fn test_reverse_filter_lets_later_steps_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let steps = vec![
            Step::reverse_filter("False").unwrap(),
            Step::native("count", move |data, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(data.to_string())
            }),
            Step::transform(".upper()").unwrap(),
        ];

        assert_eq!(executor().execute("abc", 1, &steps).unwrap(), produced("ABC"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_value_is_not_a_syntax_error() {
        let steps = vec![Step::transform("int(data)").unwrap()];
        match executor().execute("a", 1, &steps).unwrap_err() {
            ProcessingError::InvalidStep { command, kind, .. } => {
                assert_eq!(command, "int(data)");
                assert_eq!(kind, "ValueError");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_large_index_is_not_truncated() {
        let index = i32::MAX as usize + 1;
        let steps = vec![Step::transform("str(index)").unwrap()];
        assert_eq!(
            executor().execute("a", index, &steps).unwrap(),
            produced("2147483648")
        );
    }

    #[test]
    fn test_steps_after_discard_never_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let steps = vec![
            Step::filter("False").unwrap(),
            Step::native("count", move |data, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(data.to_string())
            }),
        ];

        assert_eq!(executor().execute("abc", 1, &steps).unwrap(), PipelineResult::Discarded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_regex_shorthand_and_groups() {
        let steps = vec![
            Step::filter("/^(\\w+)=(\\d+)$/").unwrap(),
            Step::transform("$2").unwrap(),
        ];
        assert_eq!(executor().execute("port=8080", 1, &steps).unwrap(), produced("8080"));
        assert_eq!(executor().execute("nothing here", 2, &steps).unwrap(), PipelineResult::Discarded);
    }

    #[test]
    fn test_last_match_is_scoped_to_record() {
        let exec = executor();
        let first = vec![Step::transform("/(b)/").unwrap()];
        exec.execute("abc", 1, &first).unwrap();

        let second = vec![Step::transform("$1").unwrap()];
        assert_eq!(exec.execute("xyz", 2, &second).unwrap(), produced(""));
    }

    #[test]
    fn test_none_is_missing() {
        let steps = vec![Step::transform("None").unwrap()];
        assert_eq!(
            executor().execute("abc", 1, &steps).unwrap(),
            PipelineResult::Produced(OutputValue::Missing)
        );
    }

    #[test]
    fn test_non_string_values_are_rendered() {
        let steps = vec![Step::transform(".split(\",\")").unwrap()];
        assert_eq!(
            executor().execute("a,b", 1, &steps).unwrap(),
            produced(r#"["a", "b"]"#)
        );
    }

    #[test]
    fn test_no_steps_passes_record_through() {
        assert_eq!(executor().execute("abc", 1, &[]).unwrap(), produced("abc"));
    }

    #[test]
    fn test_evaluation_error_aborts_record() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let steps = vec![
            Step::transform("data()").unwrap(),
            Step::native("count", move |data, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(data.to_string())
            }),
        ];

        let err = executor().execute("abc", 1, &steps).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Invalid command \"data()\": ["), "{}", message);
        assert!(message.ends_with('.'), "{}", message);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fail_is_reported_with_its_message() {
        let steps = vec![Step::transform("fail(\"boom\")").unwrap()];
        let err = executor().execute("abc", 1, &steps).unwrap_err();
        assert_eq!(err.to_string(), "Invalid command \"fail(\"boom\")\": [Fail] boom.");
        match err {
            ProcessingError::InvalidStep { command, kind, message } => {
                assert_eq!(command, "fail(\"boom\")");
                assert_eq!(kind, "Fail");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_native_error() {
        let steps = vec![Step::native("broken", |_, _| Err(anyhow::anyhow!("no luck")))];
        let err = executor().execute("abc", 1, &steps).unwrap_err();
        assert_eq!(err.to_string(), "Invalid command \"broken\": [Error] no luck.");
    }
}
