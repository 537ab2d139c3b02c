use serde::{Deserialize, Serialize};

/// A frame on the streaming status channel. Serialized as the `data`
/// payload of a Server-Sent-Event; the `type` tag is what clients
/// dispatch on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusUpdate {
    /// Progress line while the agent works ("Checking the piece catalog...").
    Status {
        message: String,
        tool: Option<String>,
    },
    /// Record of a completed tool call with a result summary.
    ActionLog { message: String, tool: String },
    /// Announces a chunked reply follows.
    ChunkStart { total_chunks: usize },
    /// One slice of a large reply.
    Chunk {
        data: String,
        index: usize,
        total: usize,
    },
    /// All chunks delivered.
    ChunkEnd,
    /// Terminal frame. `reply` is set when the response was small enough
    /// to send whole; chunked replies send `done` with no reply.
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        reply: Option<String>,
    },
    /// Terminal frame on failure.
    Error { message: String },
    /// Terminal frame after cooperative cancellation.
    Cancelled { message: String },
}

impl StatusUpdate {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            tool: None,
        }
    }

    pub fn tool_status(message: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            tool: Some(tool.into()),
        }
    }

    /// True for frames that end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::Error { .. } | Self::Cancelled { .. }
        )
    }
}

/// Replies longer than this are split into chunks.
pub const CHUNK_THRESHOLD: usize = 6000;
/// Size of each chunk frame.
pub const CHUNK_SIZE: usize = 3000;

/// Split a reply into chunk frames, or a single `done` frame when small.
/// Chunk boundaries respect UTF-8 character boundaries.
pub fn reply_frames(reply: &str) -> Vec<StatusUpdate> {
    if reply.len() <= CHUNK_THRESHOLD {
        return vec![StatusUpdate::Done {
            reply: Some(reply.to_string()),
        }];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut start = 0;
    while start < reply.len() {
        let mut end = (start + CHUNK_SIZE).min(reply.len());
        while end < reply.len() && !reply.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(reply[start..end].to_string());
        start = end;
    }

    let total = chunks.len();
    let mut frames = Vec::with_capacity(total + 3);
    frames.push(StatusUpdate::ChunkStart {
        total_chunks: total,
    });
    for (index, data) in chunks.into_iter().enumerate() {
        frames.push(StatusUpdate::Chunk { data, index, total });
    }
    frames.push(StatusUpdate::ChunkEnd);
    frames.push(StatusUpdate::Done { reply: None });
    frames
}
