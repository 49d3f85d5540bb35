// Inbound cluster messages: requests are served against local state and answered;
// replies complete pending exchanges.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::cluster::{Envelope, NodeId};
use crate::server_service::ServerService;

/// Subscribes before returning, so messages sent after this call are not missed.
pub fn spawn(
    service: Arc<ServerService>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let mut inbox = service.transport().subscribe();
    let span = tracing::span!(tracing::Level::DEBUG, "listener", node = %service.local_node());
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = inbox.recv() => {
                    match received {
                        Ok(payload) => dispatch(&service, payload),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "listener lagged; cluster messages dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Listener shutting down");
                    break;
                }
            }
        }
    }
    .instrument(span))
}

fn dispatch(service: &Arc<ServerService>, payload: Bytes) {
    let envelope = match Envelope::decode(&payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, bytes = payload.len(), "undecodable cluster message");
            return;
        }
    };

    if !envelope.message.is_request() {
        service.exchange().deliver(envelope);
        return;
    }

    let service = service.clone();
    tokio::spawn(async move {
        let Envelope {
            correlation_id,
            sender,
            message,
        } = envelope;
        let operation = message.operation();
        let Some(reply) = service.handle_request(message).await else {
            return;
        };
        let out = Envelope {
            correlation_id,
            sender: service.local_node().as_str().to_string(),
            message: reply,
        };
        let target = NodeId::new(sender);
        match out.encode() {
            Ok(bytes) => {
                if let Err(e) = service.transport().send(&target, Bytes::from(bytes)) {
                    tracing::warn!(error = %e, node = %target, operation, "reply send failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, operation, "reply encode failed"),
        }
    });
}
