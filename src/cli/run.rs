//! Input and output for `neuroprompt run`.

use crate::{Error, Result};
use std::io::{BufRead, Read, Write};
use std::path::Path;

/// Shown before reading a request interactively.
pub const REQUEST_PROMPT: &str = "Enter your prompt request: ";

/// Resolves the request text for a run.
///
/// An explicit request is used as given. Otherwise the request is read from
/// `input`: one line after printing [`REQUEST_PROMPT`] to `prompt` when
/// `interactive`, or everything up to end of input when piped.
///
/// # Errors
///
/// Returns an error if reading `input` or writing `prompt` fails.
pub fn read_request(
    explicit: Option<String>,
    mut input: impl BufRead,
    interactive: bool,
    mut prompt: impl Write,
) -> Result<String> {
    if let Some(request) = explicit {
        return Ok(request);
    }

    let io_error = |e: std::io::Error| Error::OperationFailed {
        operation: "read_request".to_string(),
        cause: e.to_string(),
    };

    let mut request = String::new();
    if interactive {
        prompt
            .write_all(REQUEST_PROMPT.as_bytes())
            .and_then(|()| prompt.flush())
            .map_err(io_error)?;
        input.read_line(&mut request).map_err(io_error)?;
    } else {
        input.read_to_string(&mut request).map_err(io_error)?;
    }
    Ok(request.trim().to_string())
}

/// Writes the final prompt to `path`, creating parent directories.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save_prompt(path: &Path, prompt: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_output_dir".to_string(),
            cause: e.to_string(),
        })?;
    }
    std::fs::write(path, prompt).map_err(|e| Error::OperationFailed {
        operation: "save_prompt".to_string(),
        cause: e.to_string(),
    })?;
    tracing::info!(path = %path.display(), chars = prompt.len(), "Prompt saved");
    Ok(())
}
