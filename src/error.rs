use async_openai::error::OpenAIError;
use std::net::SocketAddr;
use thiserror::Error;

use crate::models::RunStatus;

/// Failure of a single data-source fetch. Every variant renders as a
/// human-readable cause that ends up in the tool's `{"Error": ...}` output.
#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("The request timed out. Please try again later.")]
    Timeout,

    #[error("HTTP error occurred: {status} for url ({url})")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Error processing the API response: {0}")]
    Format(String),

    #[error("Search query cannot be empty or None.")]
    EmptyQuery,
}

impl From<reqwest::Error> for DataSourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DataSourceError::Timeout
        } else if let Some(status) = err.status() {
            DataSourceError::Status {
                status,
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else if err.is_decode() {
            DataSourceError::Format(err.to_string())
        } else {
            DataSourceError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DataSourceError {
    fn from(err: serde_json::Error) -> Self {
        DataSourceError::Format(err.to_string())
    }
}

/// Why a tool invocation produced an error record instead of data.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool '{0}' is not recognized.")]
    Unknown(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),

    #[error(transparent)]
    Source(#[from] DataSourceError),
}

/// Request-level errors raised while driving a conversation.
#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Assistant service request failed: {0}")]
    Transport(String),

    #[error("Unexpected response from assistant service: {0}")]
    DataFormat(String),

    #[error("Failed to parse arguments for tool '{tool}': {source}")]
    ToolArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("id_thread must be provided when new is False")]
    MissingThreadId,

    #[error("{0}")]
    Usage(String),

    #[error("Run {run_id} ended with status {status}: {reason}")]
    RunFailed {
        run_id: String,
        status: RunStatus,
        reason: String,
    },

    /// The run was still moving when the polling budget ran out. It is left
    /// active on the service until someone cancels it.
    #[error("Run {run_id} still {status} after {waited_secs}s")]
    PollTimeout {
        thread_id: String,
        run_id: String,
        status: RunStatus,
        waited_secs: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<OpenAIError> for AssistantError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::JSONDeserialize(..) => AssistantError::DataFormat(err.to_string()),
            OpenAIError::InvalidArgument(msg) => AssistantError::Config(msg),
            other => AssistantError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
