//! Shared output layer so every command renders human and JSON output the
//! same way.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--json` flag
//! 2. `output = "json"` in the user config
//! 3. Default: [`OutputMode::Human`]

use std::io::{self, Write};

use metaspn_lake::ErrorCode;
use metaspn_lake::enhancement::EnhancementError;
use metaspn_lake::event_log::EventLogError;
use metaspn_lake::layout::LayoutError;
use metaspn_lake::loader::LoaderError;
use metaspn_lake::manifest::ManifestError;
use metaspn_lake::store::StoreError;
use serde::Serialize;

/// Shared width for human separators.
pub const RULE_WIDTH: usize = 72;

pub fn rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    rule(w)
}

/// Left-aligned key/value line.
pub fn kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<16} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }

    /// `--json` wins, then the user config's `output` value.
    pub fn resolve(json_flag: bool, configured: Option<&str>) -> Self {
        if json_flag {
            return Self::Json;
        }
        match configured.map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Self::Json,
            _ => Self::Human,
        }
    }
}

/// Render a serializable value to stdout in the requested format.
///
/// In JSON mode the value is serialized with `serde_json`; otherwise
/// `human_fn` writes the text form.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Human => human_fn(value, &mut out)?,
    }
    Ok(())
}

/// A structured error with optional suggestion and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Stable `E####` code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl From<&anyhow::Error> for CliError {
    fn from(err: &anyhow::Error) -> Self {
        let code = error_code_of(err);
        Self {
            message: format!("{err:#}"),
            suggestion: code.and_then(ErrorCode::hint).map(str::to_string),
            error_code: code.map(|c| c.code().to_string()),
        }
    }
}

/// First lake error code found in the error chain.
pub fn error_code_of(err: &anyhow::Error) -> Option<ErrorCode> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<LayoutError>() {
            Some(e.code())
        } else if let Some(e) = cause.downcast_ref::<LoaderError>() {
            Some(e.code())
        } else if let Some(e) = cause.downcast_ref::<ManifestError>() {
            Some(e.code())
        } else if let Some(e) = cause.downcast_ref::<EnhancementError>() {
            Some(e.code())
        } else if let Some(e) = cause.downcast_ref::<EventLogError>() {
            Some(e.code())
        } else if let Some(e) = cause.downcast_ref::<StoreError>() {
            Some(e.code())
        } else {
            cause
                .downcast_ref::<toml::de::Error>()
                .map(|_| ErrorCode::ConfigParseError)
        }
    })
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Human => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(suggestion) = &error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}
