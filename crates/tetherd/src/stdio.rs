//! Newline-delimited JSON request loop over standard streams.
//!
//! Each input line is one request payload. Each output line is either the
//! response payload or an object of the form
//! `{"error": {"code": ..., "message": ...}}`. Used by both the proxy and
//! standalone roles so callers see the same behaviour either way.

use std::io::{self, BufRead, Write};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use tether_protocol::codes;

const STDIO_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stdio");

/// Reply to a single input line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Response payload.
    Reply(Value),
    /// Request-local failure; the loop continues.
    Fail {
        /// Machine-readable code.
        code: String,
        /// Human-readable description.
        message: String,
    },
}

/// Failure of the standard streams themselves.
#[derive(Debug, Error)]
pub enum StdioError {
    /// Reading input failed.
    #[error("failed to read request: {source}")]
    Read {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing output failed.
    #[error("failed to write response: {source}")]
    Write {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Answers each line of `input` via `respond` until end of input.
///
/// Returns the number of requests answered. Lines that are not JSON are
/// answered with an `INVALID_MESSAGE` error without calling `respond`.
///
/// # Errors
///
/// Stops with the first error `respond` returns, or with a
/// [`StdioError`] when the streams fail.
pub fn serve_lines<R, W, F, E>(input: R, mut output: W, mut respond: F) -> Result<u64, E>
where
    R: BufRead,
    W: Write,
    F: FnMut(Value) -> Result<LineOutcome, E>,
    E: From<StdioError>,
{
    let mut answered = 0;
    for line in input.lines() {
        let line = line.map_err(|source| StdioError::Read { source })?;
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match serde_json::from_str::<Value>(&line) {
            Ok(payload) => respond(payload)?,
            Err(error) => LineOutcome::Fail {
                code: codes::INVALID_MESSAGE.to_owned(),
                message: format!("request is not valid JSON: {error}"),
            },
        };
        write_outcome(&mut output, &outcome).map_err(|source| StdioError::Write { source })?;
        answered += 1;
    }
    debug!(target: STDIO_TARGET, answered, "input closed");
    Ok(answered)
}

fn write_outcome<W: Write>(output: &mut W, outcome: &LineOutcome) -> io::Result<()> {
    let value = match outcome {
        LineOutcome::Reply(payload) => payload.clone(),
        LineOutcome::Fail { code, message } => json!({
            "error": { "code": code, "message": message }
        }),
    };
    serde_json::to_writer(&mut *output, &value)?;
    output.write_all(b"\n")?;
    output.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(input: &str) -> (Result<u64, StdioError>, String) {
        let mut output = Vec::new();
        let result = serve_lines(Cursor::new(input.to_owned()), &mut output, |payload| {
            if payload.get("fail").is_some() {
                Ok(LineOutcome::Fail {
                    code: String::from("HANDLER_ERROR"),
                    message: String::from("asked to fail"),
                })
            } else {
                Ok(LineOutcome::Reply(json!({ "echo": payload })))
            }
        });
        (result, String::from_utf8(output).expect("utf-8 output"))
    }

    #[test]
    fn answers_each_line_in_order() {
        let (result, output) = run("{\"n\":1}\n\n{\"fail\":true}\nnot json\n");
        assert_eq!(result.expect("loop completes"), 3);
        let lines: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines[0], json!({ "echo": { "n": 1 } }));
        assert_eq!(lines[1]["error"]["code"], "HANDLER_ERROR");
        assert_eq!(lines[2]["error"]["code"], "INVALID_MESSAGE");
    }
}
