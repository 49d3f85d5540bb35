// Error types shared by the dump protocol and cluster plumbing

use crate::cluster::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A heap dump is already being generated on this node.
    #[error("heap dump {0} is already in progress")]
    HeapDumpInProgress(String),
    /// The request could not be delivered to `node`.
    #[error("no reply from {node}: {reason}")]
    NoReply { node: NodeId, reason: String },
    #[error("timed out waiting for {operation} reply from {node}")]
    Timeout { node: NodeId, operation: &'static str },
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
    #[error("transport: {0}")]
    Transport(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
