//! WebSocket endpoint for editor sessions.
//!
//! Sessions connect to `/forms/{form_id}` with a token in the
//! `Authorization: Bearer` header or the `token` query parameter. The
//! upgrade request is where authentication happens: structurally invalid
//! requests are rejected at the HTTP layer, resolver-level rejections close
//! the socket before the session is attached to any document. No tree data
//! ever reaches an unauthenticated peer.

use crate::connection::ClientConnection;
use crate::gateway::{Credentials, SessionGateway};
use crate::manager::DocumentManager;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

/// Accepts editor connections and routes them to document actors.
pub struct CollabServer {
    gateway: SessionGateway,
    manager: Arc<DocumentManager>,
}

impl CollabServer {
    pub fn new(gateway: SessionGateway, manager: Arc<DocumentManager>) -> Self {
        Self { gateway, manager }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Collab server listening on {}", listen_addr);
        Ok(listener)
    }

    /// Handle a new incoming TCP connection.
    ///
    /// Upgrade, authentication and attach run on their own task so a slow
    /// resolver never blocks the accept loop.
    pub fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        let gateway = self.gateway.clone();
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            handle_connection(gateway, manager, stream, addr).await;
        });
    }
}

async fn handle_connection(
    gateway: SessionGateway,
    manager: Arc<DocumentManager>,
    stream: TcpStream,
    addr: SocketAddr,
) {
    let mut form_id: Option<String> = None;
    let mut credentials = Credentials::default();

    let callback = |req: &Request, response: Response| {
        form_id = parse_form_id(req.uri().path());
        credentials = extract_credentials(req);

        // Fail closed at the upgrade for structurally invalid requests
        if form_id.is_none() {
            return Err(reject(StatusCode::BAD_REQUEST, "missing form id"));
        }
        if credentials.first_present().is_none() {
            return Err(reject(StatusCode::UNAUTHORIZED, "missing credentials"));
        }
        Ok(response)
    };

    let mut ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket upgrade from {} failed: {}", addr, e);
            return;
        }
    };

    // Resolver check runs before the replica is attached to the transport;
    // a rejected session never sees document data
    let session = match gateway.authenticate(form_id.as_deref(), &credentials).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Rejected connection from {}: {}", addr, e);
            let _ = ws_stream.close(None).await;
            return;
        }
    };

    info!(
        "Session {} (user {}, {:?}) connected from {} for {}",
        session.id, session.user_id, session.permission, addr, session.form_id
    );

    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let doc_tx = manager.attach(session.clone(), outbox_tx).await;
    ClientConnection::spawn(ws_stream, session, doc_tx, outbox_rx);
}

/// Extract the form id from a `/forms/{form_id}` request path.
fn parse_form_id(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/forms/")?;
    let id = rest.trim_end_matches('/');
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id.to_string())
}

/// Read credentials from all supported channels of the upgrade request.
fn extract_credentials(req: &Request) -> Credentials {
    let header_token = req
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    let param_token = req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token" && !value.is_empty()).then(|| value.to_string())
        })
    });

    Credentials {
        header_token,
        param_token,
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn test_parse_form_id() {
        assert_eq!(parse_form_id("/forms/abc-123"), Some("abc-123".into()));
        assert_eq!(parse_form_id("/forms/abc-123/"), Some("abc-123".into()));
        assert_eq!(parse_form_id("/forms/"), None);
        assert_eq!(parse_form_id("/forms/a/b"), None);
        assert_eq!(parse_form_id("/other/abc"), None);
        assert_eq!(parse_form_id("/"), None);
    }

    #[test]
    fn test_extract_credentials_header() {
        let req = Request::builder()
            .uri("/forms/f1")
            .header("Authorization", "Bearer tok-123")
            .body(())
            .unwrap();

        let creds = extract_credentials(&req);
        assert_eq!(creds.header_token.as_deref(), Some("tok-123"));
        assert_eq!(creds.first_present(), Some("tok-123"));
    }

    #[test]
    fn test_extract_credentials_query_param() {
        let creds = extract_credentials(&request("/forms/f1?token=tok-456"));
        assert!(creds.header_token.is_none());
        assert_eq!(creds.first_present(), Some("tok-456"));
    }

    #[test]
    fn test_header_preferred_over_param() {
        let req = Request::builder()
            .uri("/forms/f1?token=from-param")
            .header("Authorization", "Bearer from-header")
            .body(())
            .unwrap();

        let creds = extract_credentials(&req);
        assert_eq!(creds.first_present(), Some("from-header"));
    }

    #[test]
    fn test_no_credentials() {
        let creds = extract_credentials(&request("/forms/f1"));
        assert!(creds.first_present().is_none());

        // Empty token parameter does not count as a credential
        let creds = extract_credentials(&request("/forms/f1?token="));
        assert!(creds.first_present().is_none());
    }
}
