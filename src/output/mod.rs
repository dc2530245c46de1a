// Output module: error taxonomy, messages, boundary payloads and rendering

use serde::Serialize;

pub mod errors;
pub mod json_output;
pub mod messages;
pub mod response;
pub mod terminal;

pub use errors::*;
pub use json_output::*;
pub use messages::MessageCatalog;
pub use response::*;
pub use terminal::*;

/// Output format for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text output with colors
    #[default]
    Text,
    /// Machine-readable JSON output
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Unified output writer supporting both text and JSON formats
pub enum OutputWriter {
    Text(TerminalOutput),
    Json(JsonOutput),
}

impl OutputWriter {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        match format {
            OutputFormat::Text => OutputWriter::Text(TerminalOutput::new(quiet)),
            OutputFormat::Json => OutputWriter::Json(JsonOutput::new(true)),
        }
    }

    pub fn spinner(&self, message: &str) -> indicatif::ProgressBar {
        match self {
            OutputWriter::Text(output) => output.spinner(message),
            OutputWriter::Json(_) => indicatif::ProgressBar::hidden(),
        }
    }

    /// Print a payload; text mode hands successful data to `render`
    pub fn print<T, F>(&self, result: &ResultJson<T>, render: F)
    where
        T: Serialize,
        F: FnOnce(&TerminalOutput, &T),
    {
        match self {
            OutputWriter::Text(output) => match result {
                ResultJson::Success { data } => render(output, data),
                ResultJson::Failure(failure) => output.print_failure(failure),
            },
            OutputWriter::Json(output) => output.emit(result),
        }
    }
}
