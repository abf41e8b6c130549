use std::io::{BufRead, Write};

use tracing::info;

use tether_protocol::codes;

use crate::server::RequestHandler;
use crate::stdio::{LineOutcome, StdioError, serve_lines};

use super::PROCESS_TARGET;

/// Serves requests from `input` with `handler` in this process, writing one
/// response line per request to `output`.
///
/// Returns the number of requests answered. Handler failures are written as
/// `HANDLER_ERROR` lines and do not stop the loop.
///
/// # Errors
///
/// Fails when the streams fail.
pub fn run_standalone<R, W>(
    handler: &dyn RequestHandler,
    client_id: &str,
    input: R,
    output: W,
) -> Result<u64, StdioError>
where
    R: BufRead,
    W: Write,
{
    info!(target: PROCESS_TARGET, client_id, "serving requests in-process");
    serve_lines(input, output, |payload| {
        Ok::<_, StdioError>(match handler.handle(payload, client_id) {
            Ok(response) => LineOutcome::Reply(response),
            Err(error) => LineOutcome::Fail {
                code: codes::HANDLER_ERROR.to_owned(),
                message: error.message().to_owned(),
            },
        })
    })
}
