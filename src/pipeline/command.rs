// src/pipeline/command.rs - pipeline steps and expression shorthands
use starlark::environment::Module;
use starlark::eval::Evaluator;
use starlark::syntax::AstModule;
use starlark::values::OwnedFrozenValue;
use std::fmt;
use std::sync::Arc;

use crate::capabilities::Capabilities;
use crate::error::{ConfigurationError, ProcessingError};
use crate::pipeline::executor::dialect;

/// Name the current value is bound to inside expressions
pub const DATA_VAR: &str = "data";
/// Name the record index is bound to inside expressions
pub const INDEX_VAR: &str = "index";
/// Function a `--source` file must define
pub const PROCESS_FN: &str = "process";

/// A Rust callable used as a step; receives the current value's text and the record index
pub type NativeFunction = Arc<dyn Fn(&str, usize) -> anyhow::Result<String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Replace the current value with the result
    Transform,
    /// Discard the record when the result is falsy
    Filter,
    /// Discard the record when the result is truthy
    ReverseFilter,
    /// Replace the current value with the result of a loaded function
    Function,
}

#[derive(Clone)]
pub enum Command {
    /// A Starlark expression, already rewritten and parsed
    Expression { text: String, ast: AstModule },
    /// The frozen `process` function of a `--source` file
    Script { path: String, function: OwnedFrozenValue },
    Native { name: String, function: NativeFunction },
}

impl Command {
    /// Text used to identify this command in error messages
    pub fn text(&self) -> &str {
        match self {
            Command::Expression { text, .. } => text,
            Command::Script { path, .. } => path,
            Command::Native { name, .. } => name,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Expression { text, .. } => f.debug_tuple("Expression").field(text).finish(),
            Command::Script { path, .. } => f.debug_struct("Script").field("path", path).finish(),
            Command::Native { name, .. } => f.debug_struct("Native").field("name", name).finish(),
        }
    }
}

/// One configured pipeline operation
#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub command: Command,
}

impl Step {
    pub fn transform(expression: &str) -> Result<Self, ProcessingError> {
        Self::expression(StepKind::Transform, expression)
    }

    pub fn filter(expression: &str) -> Result<Self, ProcessingError> {
        Self::expression(StepKind::Filter, expression)
    }

    pub fn reverse_filter(expression: &str) -> Result<Self, ProcessingError> {
        Self::expression(StepKind::ReverseFilter, expression)
    }

    /// Rewrite shorthands and check the syntax up front
    pub fn expression(kind: StepKind, expression: &str) -> Result<Self, ProcessingError> {
        let text = rewrite_command(expression);
        let ast = AstModule::parse("command", text.clone(), &dialect())
            .map_err(|e| ProcessingError::from_syntax(&text, &e))?;

        Ok(Step {
            kind,
            command: Command::Expression { text, ast },
        })
    }

    /// Load a Starlark file that must define `process(data, index)`
    pub fn source(path: &str, capabilities: &Capabilities) -> Result<Self, ConfigurationError> {
        let unreadable = || ConfigurationError::UnreadableSource(path.to_string());

        let source = std::fs::read_to_string(path).map_err(|e| {
            tracing::debug!("cannot read {}: {}", path, e);
            unreadable()
        })?;
        let ast = AstModule::parse(path, source, &dialect()).map_err(|e| {
            tracing::debug!("cannot parse {}: {}", path, e);
            unreadable()
        })?;

        let module = Module::new();
        capabilities.load_into(&module);
        {
            let mut eval = Evaluator::new(&module);
            eval.eval_module(ast, capabilities.globals()).map_err(|e| {
                tracing::debug!("cannot evaluate {}: {}", path, e);
                unreadable()
            })?;
        }
        let frozen = module.freeze().map_err(|e| {
            tracing::debug!("cannot freeze {}: {}", path, e.err_msg);
            unreadable()
        })?;

        // Evaluated once; records call the frozen function
        match frozen.get(PROCESS_FN) {
            Ok(function) if function.value().get_type() == "function" => Ok(Step {
                kind: StepKind::Function,
                command: Command::Script {
                    path: path.to_string(),
                    function,
                },
            }),
            _ => Err(ConfigurationError::NotAFunction(path.to_string())),
        }
    }

    pub fn native<F>(name: &str, function: F) -> Self
    where
        F: Fn(&str, usize) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Step {
            kind: StepKind::Function,
            command: Command::Native {
                name: name.to_string(),
                function: Arc::new(function),
            },
        }
    }
}

/// Expand the command-line shorthands:
/// `.attr` and `[key]` apply to the current value, `/re/flags` matches the
/// current value against a regex, and `$N` reads group N of the last match.
/// There is no `$0`; it reads as `None`.
pub fn rewrite_command(command: &str) -> String {
    if command.starts_with('.') || command.starts_with('[') {
        return format!("{}{}", DATA_VAR, command);
    }

    if let Some((pattern, flags)) = parse_regex_literal(command) {
        return format!(
            "re_match(str({}), {}, {})",
            DATA_VAR,
            quote(&pattern),
            quote(&flags)
        );
    }

    if let Some(digits) = command.strip_prefix('$') {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            let group = digits.trim_start_matches('0');
            if group.is_empty() {
                return "None".to_string();
            }
            return format!("last_match({})", group);
        }
    }

    command.to_string()
}

fn parse_regex_literal(command: &str) -> Option<(String, String)> {
    let body = command.strip_prefix('/')?;
    let end = body.rfind('/')?;
    let (pattern, flags) = (&body[..end], &body[end + 1..]);
    if pattern.is_empty() || !flags.chars().all(|c| "gimsx".contains(c)) {
        return None;
    }
    Some((pattern.replace("\\/", "/"), flags.to_string()))
}

/// Render `text` as a double-quoted Starlark string literal
fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
