use std::io::Write;

use moodfeed_core::{FailureKind, ProviderError};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;
use crate::metadata::Metadata;

/// Structured error entry carried next to (possibly empty) data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeError {
    pub code: String,
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&ProviderError> for EnvelopeError {
    fn from(error: &ProviderError) -> Self {
        Self {
            code: error.name(),
            kind: error.error.kind(),
            message: error.to_string(),
            retryable: error.error.is_retryable(),
        }
    }
}

/// The single JSON document every command prints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub meta: Metadata,
    pub data: Value,
    pub errors: Vec<EnvelopeError>,
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}")?;
    stdout.flush()?;
    Ok(())
}
