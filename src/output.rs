// src/output.rs - output sink
use std::borrow::Cow;
use std::io::{self, Write};

use crate::pipeline::context::OutputValue;

/// Text printed for a value, with `None` shown by name
pub fn render(value: &OutputValue) -> Cow<'_, str> {
    match value {
        OutputValue::Missing => Cow::Borrowed("<None>"),
        OutputValue::Text(text) => Cow::Borrowed(text.as_str()),
    }
}

/// Write one produced value as one line
pub fn write_value<W: Write>(output: &mut W, value: &OutputValue) -> io::Result<()> {
    writeln!(output, "{}", render(value))
}

/// Print a fatal error for the user
pub fn report_error(err: &dyn std::error::Error) {
    eprintln!("{}", err);
}
