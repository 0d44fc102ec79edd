//! Request routing for transports.
//!
//! A transport turns whatever it receives into a [`Request`] and hands it to
//! [`handle_request`]; line-oriented transports can pass raw JSON text to
//! [`route_line`]. Failures come back as [`Response::Error`] so a bad request never
//! takes the transport down.

use crate::error::ServerError;
use crate::messaging::types::{Request, Response};
use crate::server::DispatchServer;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes one request against the server.
///
/// # Arguments
///
/// * `server` - The running dispatch server
/// * `request` - The decoded request
///
/// # Returns
///
/// The response to send back to the caller. Authorization runs before a message is
/// routed; a message refused by the [`Authorizer`](crate::auth::Authorizer) is never
/// queued.
pub fn handle_request(server: &Arc<DispatchServer>, request: Request) -> Response {
    match execute(server, request) {
        Ok(response) => response,
        Err(err) => {
            warn!("⚠️ Request failed: {}", err);
            Response::Error {
                message: err.to_string(),
            }
        }
    }
}

/// Decodes a JSON request and executes it.
///
/// # Example Request
///
/// ```json
/// {"type": "message", "message": {"session_id": 0, "entity_id": 1, "operation_id": "move"}}
/// ```
pub fn route_line(server: &Arc<DispatchServer>, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => {
            debug!("📨 Received {:?}", request);
            handle_request(server, request)
        }
        Err(err) => {
            warn!("⚠️ Undecodable request: {}", err);
            Response::Error {
                message: ServerError::InvalidRequest(err.to_string()).to_string(),
            }
        }
    }
}

fn execute(server: &Arc<DispatchServer>, request: Request) -> Result<Response, ServerError> {
    match request {
        Request::NewSession => {
            let session_id = server.new_session()?;
            Ok(Response::SessionCreated { session_id })
        }
        Request::Message { claims, message } => {
            server.authorize(message.session_id, claims.as_ref())?;
            server.route_message(message)?;
            Ok(Response::Accepted)
        }
        Request::EndSession { session_id } => {
            server.end_session(session_id)?;
            Ok(Response::SessionEnded { session_id })
        }
        Request::Stop => {
            server.stop();
            Ok(Response::Stopping)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use skirmish_runtime::{Resolver, ScopeChain, SessionId};

    fn running_server() -> Arc<DispatchServer> {
        let resolver = Resolver::new();
        ScopeChain::install(&resolver).unwrap();
        let server = DispatchServer::new(
            ServerConfig {
                shard_count: 1,
                ..ServerConfig::default()
            },
            resolver,
        );
        server.start().unwrap();
        server
    }

    #[test]
    fn garbage_is_answered_with_an_error() {
        let server = running_server();
        let response = route_line(&server, "{not json");
        assert!(matches!(
            response,
            Response::Error { message } if message.contains("invalid request")
        ));
        server.shutdown().unwrap();
    }

    #[test]
    fn session_lifecycle_over_lines() {
        let server = running_server();
        assert_eq!(
            route_line(&server, r#"{"type": "new_session"}"#),
            Response::SessionCreated {
                session_id: SessionId(0)
            }
        );
        assert_eq!(
            route_line(
                &server,
                concat!(
                    r#"{"type": "message", "message": "#,
                    r#"{"session_id": 0, "entity_id": 1, "operation_id": "create_object"}}"#
                )
            ),
            Response::Accepted
        );
        assert_eq!(
            route_line(&server, r#"{"type": "end_session", "session_id": 0}"#),
            Response::SessionEnded {
                session_id: SessionId(0)
            }
        );
        assert!(matches!(
            route_line(&server, r#"{"type": "end_session", "session_id": 0}"#),
            Response::Error { .. }
        ));
        assert_eq!(route_line(&server, r#"{"type": "stop"}"#), Response::Stopping);
        server.join().unwrap();
    }
}
