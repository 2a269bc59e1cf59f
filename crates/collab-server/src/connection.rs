//! Individual session connection management.
//!
//! Each authenticated session wraps a WebSocket stream, split into a read
//! task that forwards binary frames to the document actor and a write task
//! that drains the session's outbox. Connections only exist post-auth; an
//! unauthenticated socket never reaches this module.

use crate::document::DocCommand;
use collab_core::protocol::MAX_FRAME_SIZE;
use collab_core::session::Session;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// A live, authenticated WebSocket connection.
pub struct ClientConnection;

impl ClientConnection {
    /// Spawn the read and write tasks for a session.
    ///
    /// The read task sends `Frame` commands in arrival order (preserving
    /// per-session ordering) and a final `Detach` when the socket closes.
    /// The write task drains `outbox_rx`; when the document drops the outbox
    /// the socket is closed gracefully.
    pub fn spawn(
        ws_stream: WebSocketStream<TcpStream>,
        session: Session,
        doc_tx: mpsc::UnboundedSender<DocCommand>,
        outbox_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let (write, read) = ws_stream.split();
        tokio::spawn(Self::write_loop(session.id, write, outbox_rx));
        tokio::spawn(Self::read_loop(session, read, doc_tx));
    }

    async fn write_loop(
        session_id: Uuid,
        mut write: SplitSink<WebSocketStream<TcpStream>, Message>,
        mut outbox_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(data) = outbox_rx.recv().await {
            if let Err(e) = write.send(Message::Binary(data.to_vec().into())).await {
                debug!("Send to session {} failed: {}", session_id, e);
                break;
            }
        }
        // Outbox closed: the document released this session
        let _ = write.send(Message::Close(None)).await;
        debug!("Write loop for session {} ended", session_id);
    }

    async fn read_loop(
        session: Session,
        mut read: SplitStream<WebSocketStream<TcpStream>>,
        doc_tx: mpsc::UnboundedSender<DocCommand>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Binary(data) => data.to_vec(),
                        Message::Text(text) => text.into_bytes(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from session {}", session.id);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    if data.len() > MAX_FRAME_SIZE {
                        warn!(
                            "Frame from session {} exceeds max size ({} > {}), dropping",
                            session.id,
                            data.len(),
                            MAX_FRAME_SIZE
                        );
                        continue;
                    }

                    if doc_tx
                        .send(DocCommand::Frame {
                            session_id: session.id,
                            data,
                        })
                        .is_err()
                    {
                        // Document actor gone; nothing left to route to
                        break;
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection for session {} closed", session.id);
                        }
                        _ => {
                            error!("WebSocket error on session {}: {}", session.id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Stream for session {} ended", session.id);
                    break;
                }
            }
        }

        // A disconnecting session leaves the document immediately; it does
        // not cancel any in-flight store
        let _ = doc_tx.send(DocCommand::Detach {
            session_id: session.id,
        });
    }
}
