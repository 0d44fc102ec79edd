//! Line-delimited JSON transport.
//!
//! Each input line is one [`Request`](skirmish_server::Request); each produces exactly
//! one JSON [`Response`](skirmish_server::Response) line on the output. End of input
//! stops the server.

use anyhow::Context;
use skirmish_server::{route_line, DispatchServer};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info};

/// Serves requests from `input` until it is exhausted or the server stops.
pub fn serve_lines<R: BufRead, W: Write>(
    server: &Arc<DispatchServer>,
    input: R,
    mut output: W,
) -> anyhow::Result<()> {
    for line in input.lines() {
        let line = line.context("failed to read request")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = route_line(server, line);
        let encoded = serde_json::to_string(&response).context("failed to encode response")?;
        writeln!(output, "{encoded}").context("failed to write response")?;
        output.flush().context("failed to flush response")?;

        if !server.is_running() {
            debug!("Server stopping, transport done");
            return Ok(());
        }
    }

    info!("📭 Input closed, stopping server");
    server.stop();
    Ok(())
}
