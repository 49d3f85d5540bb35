// Wire types for the dump protocol: six request/reply pairs inside a correlated envelope.

use wincode::{SchemaRead, SchemaWrite};

use crate::error::MonitorError;

#[derive(Debug, Clone, PartialEq, Eq, SchemaRead, SchemaWrite)]
pub enum ClusterMessage {
    GetThreadDump,
    GetThreadDumpReply {
        thread_dump: String,
    },
    CreateHeapDump,
    /// `error` is set when the node refused (e.g. a dump already in progress).
    CreateHeapDumpReply {
        id: String,
        error: Option<String>,
    },
    IsHeapDumpComplete {
        id: String,
    },
    IsHeapDumpCompleteReply {
        id: String,
        complete: bool,
    },
    GetHeapDumpLength {
        id: String,
    },
    GetHeapDumpLengthReply {
        id: String,
        length: u64,
    },
    GetHeapDumpContent {
        id: String,
        offset: u64,
        length: u32,
    },
    GetHeapDumpContentReply {
        id: String,
        content: Vec<u8>,
    },
    DisposeHeapDump {
        id: String,
    },
    DisposeHeapDumpReply {
        id: String,
    },
}

impl ClusterMessage {
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            ClusterMessage::GetThreadDump
                | ClusterMessage::CreateHeapDump
                | ClusterMessage::IsHeapDumpComplete { .. }
                | ClusterMessage::GetHeapDumpLength { .. }
                | ClusterMessage::GetHeapDumpContent { .. }
                | ClusterMessage::DisposeHeapDump { .. }
        )
    }

    /// Short name for logs and errors.
    pub fn operation(&self) -> &'static str {
        match self {
            ClusterMessage::GetThreadDump | ClusterMessage::GetThreadDumpReply { .. } => {
                "get_thread_dump"
            }
            ClusterMessage::CreateHeapDump | ClusterMessage::CreateHeapDumpReply { .. } => {
                "create_heap_dump"
            }
            ClusterMessage::IsHeapDumpComplete { .. }
            | ClusterMessage::IsHeapDumpCompleteReply { .. } => "is_heap_dump_complete",
            ClusterMessage::GetHeapDumpLength { .. }
            | ClusterMessage::GetHeapDumpLengthReply { .. } => "get_heap_dump_length",
            ClusterMessage::GetHeapDumpContent { .. }
            | ClusterMessage::GetHeapDumpContentReply { .. } => "get_heap_dump_content",
            ClusterMessage::DisposeHeapDump { .. } | ClusterMessage::DisposeHeapDumpReply { .. } => {
                "dispose_heap_dump"
            }
        }
    }

    /// True when `reply` answers this request: same pair and, for heap-dump operations,
    /// the same dump id.
    pub fn accepts_reply(&self, reply: &ClusterMessage) -> bool {
        use ClusterMessage::*;
        match (self, reply) {
            (GetThreadDump, GetThreadDumpReply { .. }) => true,
            (CreateHeapDump, CreateHeapDumpReply { .. }) => true,
            (IsHeapDumpComplete { id: a }, IsHeapDumpCompleteReply { id: b, .. })
            | (GetHeapDumpLength { id: a }, GetHeapDumpLengthReply { id: b, .. })
            | (GetHeapDumpContent { id: a, .. }, GetHeapDumpContentReply { id: b, .. })
            | (DisposeHeapDump { id: a }, DisposeHeapDumpReply { id: b }) => a == b,
            _ => false,
        }
    }
}

/// Addressed message. Replies echo the request's `correlation_id`.
#[derive(Debug, Clone, PartialEq, Eq, SchemaRead, SchemaWrite)]
pub struct Envelope {
    pub correlation_id: String,
    pub sender: String,
    pub message: ClusterMessage,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, MonitorError> {
        wincode::serialize(self).map_err(|e| MonitorError::Codec(format!("wincode: {}", e)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MonitorError> {
        wincode::deserialize(bytes)
            .map_err(|e| MonitorError::Codec(format!("wincode deserialize envelope: {}", e)))
    }
}
