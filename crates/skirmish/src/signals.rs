//! Signal handling for graceful server shutdown.

use skirmish_server::DispatchServer;
use std::sync::Arc;
use tracing::info;

/// Stops the server when the process receives SIGINT or SIGTERM (Ctrl+C on Windows).
///
/// The handler only requests the stop; the main thread observes it by joining the
/// shard workers.
///
/// # Returns
///
/// `Ok(())` once the handler is installed, or an error if a handler was already set
/// for this process.
pub fn setup_signal_handlers(server: &Arc<DispatchServer>) -> Result<(), ctrlc::Error> {
    let server = Arc::downgrade(server);
    ctrlc::set_handler(move || {
        info!("📡 Received termination signal");
        if let Some(server) = server.upgrade() {
            server.stop();
        }
    })
}
