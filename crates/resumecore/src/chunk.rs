use serde::{Deserialize, Serialize};

/// Position of a chunk in its run's output channel. Starts at 0, gapless.
pub type ChunkIndex = u64;

/// One unit of streamed run output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Chunk {
    #[serde(rename_all = "camelCase")]
    TextDelta { delta: String },

    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// Terminal marker; `error` is set when the run failed.
    #[serde(rename_all = "camelCase")]
    StreamEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Chunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Chunk::TextDelta {
            delta: delta.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Chunk::StreamEnd { .. })
    }
}

/// A chunk together with the index the channel assigned to it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedChunk {
    pub index: ChunkIndex,
    pub chunk: Chunk,
}
