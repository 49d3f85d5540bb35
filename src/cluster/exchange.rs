// Request/reply over pub/sub: a correlation-id keyed table of pending replies.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{ClusterMessage, ClusterTransport, Envelope, NodeId};
use crate::error::{MonitorError, MonitorResult};

struct Pending {
    target: NodeId,
    request: ClusterMessage,
    reply_tx: oneshot::Sender<ClusterMessage>,
}

/// Removes a pending entry when the request future ends, however it ends.
struct PendingEntry<'a> {
    pending: &'a std::sync::Mutex<HashMap<String, Pending>>,
    correlation_id: String,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.correlation_id);
    }
}

pub struct Exchange {
    transport: Arc<dyn ClusterTransport>,
    pending: std::sync::Mutex<HashMap<String, Pending>>,
    timeout: Duration,
}

impl Exchange {
    pub fn new(transport: Arc<dyn ClusterTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            pending: std::sync::Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Sends `message` to `target` and waits for the matching reply or the exchange timeout.
    pub async fn request(
        &self,
        target: &NodeId,
        message: ClusterMessage,
    ) -> MonitorResult<ClusterMessage> {
        let operation = message.operation();
        let correlation_id = Uuid::new_v4().to_string();
        let payload = Envelope {
            correlation_id: correlation_id.clone(),
            sender: self.transport.local_node().as_str().to_string(),
            message: message.clone(),
        }
        .encode()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.lock_pending().insert(
            correlation_id.clone(),
            Pending {
                target: target.clone(),
                request: message,
                reply_tx,
            },
        );
        let _entry = PendingEntry {
            pending: &self.pending,
            correlation_id,
        };

        if let Err(e) = self.transport.send(target, Bytes::from(payload)) {
            tracing::warn!(error = %e, node = %target, operation, "cluster message send failed");
            return Err(MonitorError::NoReply {
                node: target.clone(),
                reason: e.to_string(),
            });
        }

        let outcome = tokio::time::timeout(self.timeout, reply_rx).await;
        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(MonitorError::NoReply {
                node: target.clone(),
                reason: "exchange closed".into(),
            }),
            Err(_) => {
                tracing::warn!(node = %target, operation, "cluster exchange timed out");
                Err(MonitorError::Timeout {
                    node: target.clone(),
                    operation,
                })
            }
        }
    }

    /// Completes the pending request this reply answers. Replies with an unknown
    /// correlation id, a different sender, or a non-matching body are dropped and
    /// the requester keeps waiting.
    pub fn deliver(&self, reply: Envelope) -> bool {
        let mut pending = self.lock_pending();
        let matches = pending.get(&reply.correlation_id).is_some_and(|p| {
            p.target.as_str() == reply.sender && p.request.accepts_reply(&reply.message)
        });
        if !matches {
            tracing::debug!(
                correlation_id = %reply.correlation_id,
                sender = %reply.sender,
                operation = reply.message.operation(),
                "discarding unmatched reply"
            );
            return false;
        }
        match pending.remove(&reply.correlation_id) {
            Some(p) => p.reply_tx.send(reply.message).is_ok(),
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
