#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Cannot open file {path}: file not found.")]
    FileNotFound { path: String },

    #[error("Cannot open file {path}: permission denied.")]
    PermissionDenied { path: String },

    #[error("Invalid command \"{command}\": [{kind}] {message}.")]
    InvalidStep {
        command: String,
        kind: String,
        message: String,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Bad `--source` or `--require` arguments, reported before any input is read.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("File \"{0}\" must export a function.")]
    NotAFunction(String),

    #[error("Cannot require file \"{0}\".")]
    UnreadableSource(String),

    #[error("Cannot find module \"{0}\".")]
    UnknownModule(String),
}

impl ProcessingError {
    /// Map a failure to open `path` onto the two reported conditions,
    /// passing anything else through untouched.
    pub fn from_open(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProcessingError::FileNotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => ProcessingError::PermissionDenied {
                path: path.to_string(),
            },
            _ => ProcessingError::IoError(err),
        }
    }

    pub(crate) fn invalid_step(command: &str, kind: &str, message: impl Into<String>) -> Self {
        ProcessingError::InvalidStep {
            command: command.to_string(),
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// Build an `InvalidStep` from a Starlark evaluation failure.
    /// `Parser` errors raised while running come from parsing values
    /// (`int("a")`), not source, so they are value errors here.
    pub(crate) fn from_starlark(command: &str, err: &starlark::Error) -> Self {
        use starlark::ErrorKind;

        let (kind, message) = match err.kind() {
            ErrorKind::Fail(e) => ("Fail", e.to_string()),
            ErrorKind::Value(e) | ErrorKind::Parser(e) => ("ValueError", e.to_string()),
            ErrorKind::Function(e) => ("FunctionError", e.to_string()),
            ErrorKind::Scope(e) => ("ScopeError", e.to_string()),
            ErrorKind::StackOverflow(e) => ("StackOverflow", e.to_string()),
            ErrorKind::Other(e) => ("Error", e.to_string()),
            _ => ("Error", first_line(&err.to_string())),
        };
        Self::invalid_step(command, kind, clean_message(&message))
    }

    /// Build an `InvalidStep` from a failure to parse `command`.
    pub(crate) fn from_syntax(command: &str, err: &starlark::Error) -> Self {
        let message = match err.kind() {
            starlark::ErrorKind::Parser(e) => e.to_string(),
            _ => first_line(&err.to_string()),
        };
        Self::invalid_step(command, "SyntaxError", clean_message(&message))
    }
}

fn clean_message(message: &str) -> String {
    message.trim().trim_end_matches('.').trim_end().to_string()
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_open_errors_are_classified() {
        let err = ProcessingError::from_open(io::Error::from(io::ErrorKind::NotFound), "/nope");
        assert_eq!(err.to_string(), "Cannot open file /nope: file not found.");

        let err = ProcessingError::from_open(
            io::Error::from(io::ErrorKind::PermissionDenied),
            "/root/secret",
        );
        assert_eq!(
            err.to_string(),
            "Cannot open file /root/secret: permission denied."
        );

        let err = ProcessingError::from_open(io::Error::other("disk on fire"), "x");
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn test_invalid_step_message() {
        let err = ProcessingError::invalid_step("data()", "ValueError", "not callable");
        assert_eq!(
            err.to_string(),
            "Invalid command \"data()\": [ValueError] not callable."
        );
    }

    #[test]
    fn test_syntax_errors_are_labelled() {
        let err = starlark::syntax::AstModule::parse(
            "command",
            "data +".to_owned(),
            &starlark::syntax::Dialect::Extended,
        )
        .unwrap_err();

        let message = ProcessingError::from_syntax("data +", &err).to_string();
        assert!(message.starts_with("Invalid command \"data +\": [SyntaxError] "));
        assert!(!message.contains("]  "));
        assert!(message.ends_with('.') && !message.ends_with(".."));
    }

    #[test]
    fn test_message_whitespace_is_trimmed() {
        assert_eq!(clean_message(" boom"), "boom");
        assert_eq!(clean_message("bad value.\n"), "bad value");
    }

    #[test]
    fn test_configuration_messages() {
        assert_eq!(
            ProcessingError::from(ConfigurationError::NotAFunction("f.star".into())).to_string(),
            "File \"f.star\" must export a function."
        );
        assert_eq!(
            ConfigurationError::UnreadableSource("/foo".into()).to_string(),
            "Cannot require file \"/foo\"."
        );
        assert_eq!(
            ConfigurationError::UnknownModule("foo".into()).to_string(),
            "Cannot find module \"foo\"."
        );
    }
}
