use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use starsed::output::report_error;
use starsed::{
    Capabilities, Encoding, Input, InputMode, PipelineConfig, ProcessingError, RecordSource, Step,
    StepKind, StreamPipeline,
};

#[derive(Parser)]
#[command(name = "starsed")]
#[command(about = "Transform and filter text streams with Starlark expressions")]
#[command(version)]
struct Args {
    /// File to read instead of using standard input
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input_file: Option<PathBuf>,

    /// Consider the input a single string instead of processing it line by line
    #[arg(short = 'w', long)]
    whole: bool,

    /// Load a module before processing: a built-in namespace (hash, json, path) or a Starlark file
    #[arg(short = 'r', long = "require", value_name = "MODULE", action = ArgAction::Append)]
    requires: Vec<String>,

    /// A Starlark expression to evaluate; `data` and `index` are the current value and line number
    #[arg(short = 'c', long = "command", value_name = "COMMAND", action = ArgAction::Append)]
    commands: Vec<String>,

    /// Starlark file defining `process(data, index)`
    #[arg(short = 's', long = "source", value_name = "SOURCE", action = ArgAction::Append)]
    sources: Vec<String>,

    /// An expression or regex; falsy values discard the current line
    #[arg(short = 'f', long = "filter", value_name = "COMMAND", action = ArgAction::Append)]
    filters: Vec<String>,

    /// An expression or regex; truthy values discard the current line
    #[arg(short = 'F', long = "reverse-filter", value_name = "COMMAND", action = ArgAction::Append)]
    reverse_filters: Vec<String>,

    /// The encoding to use
    #[arg(short = 'e', long, value_enum, default_value = "utf8")]
    encoding: Encoding,

    /// Debug mode - log processing details to stderr
    #[arg(long)]
    debug: bool,

    /// Buffer size for I/O
    #[arg(long, default_value = "65536")] // 64KB
    buffer_size: usize,
}

/// Step arguments in command-line order, whatever flag introduced them
fn ordered_steps(matches: &ArgMatches) -> Vec<(StepKind, String)> {
    let mut steps = Vec::new();
    for (id, kind) in [
        ("commands", StepKind::Transform),
        ("sources", StepKind::Function),
        ("filters", StepKind::Filter),
        ("reverse_filters", StepKind::ReverseFilter),
    ] {
        if let (Some(values), Some(indices)) = (matches.get_many::<String>(id), matches.indices_of(id)) {
            steps.extend(indices.zip(values).map(|(i, value)| (i, kind, value.clone())));
        }
    }
    steps.sort_by_key(|(i, _, _)| *i);
    steps.into_iter().map(|(_, kind, value)| (kind, value)).collect()
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("starsed=debug")
    } else {
        EnvFilter::try_from_env("STARSED_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .init();
}

fn main() {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    init_logging(args.debug);

    if let Err(e) = run(args, &matches) {
        report_error(&e);
        std::process::exit(1);
    }
}

fn run(args: Args, matches: &ArgMatches) -> Result<(), ProcessingError> {
    let config = PipelineConfig {
        mode: if args.whole {
            InputMode::Whole
        } else {
            InputMode::Lines
        },
        encoding: args.encoding,
        buffer_size: args.buffer_size,
    };

    // Capabilities first, so steps can refer to them
    let mut capabilities = Capabilities::new();
    for module in &args.requires {
        capabilities.require(module)?;
    }

    let mut steps = Vec::new();
    for (kind, value) in ordered_steps(matches) {
        let step = match kind {
            StepKind::Function => Step::source(&value, &capabilities)?,
            _ => Step::expression(kind, &value)?,
        };
        tracing::debug!("step {}: {:?} {}", steps.len() + 1, step.kind, step.command.text());
        steps.push(step);
    }

    let mut pipeline = StreamPipeline::new(config, capabilities);
    for step in steps {
        pipeline.add_step(step);
    }

    let input = match args.input_file {
        Some(path) => Input::File(path),
        None => Input::Stdin,
    };
    let source = RecordSource::open(&input, args.encoding, args.buffer_size)?;

    let mut output = io::BufWriter::with_capacity(args.buffer_size, io::stdout().lock());
    let result = pipeline.process(source, &mut output);

    // Output written before a failure stays written
    if let Err(e) = output.flush() {
        if e.kind() != io::ErrorKind::BrokenPipe {
            return Err(e.into());
        }
    }

    let stats = result?;
    tracing::info!(
        "{} records processed, {} output, {} skipped in {:?}",
        stats.records_processed,
        stats.records_output,
        stats.records_skipped,
        stats.processing_time
    );

    Ok(())
}
