use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Flexible count deserializer: the assistant sometimes sends `"3"` or `3.0`
/// where the schema says integer. `null` is treated as absent.
pub(crate) fn deserialize_flexible_count<'de, D>(
    deserializer: D,
) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlexibleInt {
        Int(i64),
        Float(f64),
        String(String),
    }

    let value = Option::<FlexibleInt>::deserialize(deserializer)?;
    let n = match value {
        None => return Ok(None),
        Some(FlexibleInt::Int(i)) => i,
        Some(FlexibleInt::Float(f)) if f.fract() == 0.0 => f as i64,
        Some(FlexibleInt::Float(f)) => {
            return Err(serde::de::Error::custom(format!(
                "expected a whole number, got {f}"
            )));
        }
        Some(FlexibleInt::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(serde::de::Error::custom)?,
    };
    usize::try_from(n)
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("expected a non-negative count, got {n}")))
}

// ---------------------------------------------------------------------------
// Conversation state as the controller sees it
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
}

impl RunStatus {
    /// Statuses the service may still move on its own. Everything else is
    /// either terminal or waiting on us.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    /// Calls the run is blocked on; empty unless `status` is `RequiresAction`.
    pub tool_calls: Vec<ToolCall>,
    pub completed_at: Option<i64>,
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text as produced by the model
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    /// Last text part of the message, where the service puts the answer.
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalised data-source records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StableCoin {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "GeckoId")]
    pub gecko_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pool {
    #[serde(rename = "Project")]
    pub project: String,
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "TVL (USD)")]
    pub tvl_usd: f64,
    /// Numeric rate when the registry reports one, `"N/A"` otherwise.
    #[serde(rename = "APY")]
    pub apy: Value,
    #[serde(rename = "Chain")]
    pub chain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub href: String,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Controller input / output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub new_thread: bool,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub id: String,
    pub response: Option<String>,
}
