use async_openai::Client;
use async_openai::config::OpenAIConfig as ClientConfig;
use async_openai::types::{
    AssistantTools, AssistantToolsFunction, CreateAssistantRequestArgs, CreateMessageRequestArgs,
    CreateRunRequestArgs, CreateThreadRequest, FunctionObject, MessageContent, MessageObject,
    MessageRole as ApiMessageRole, RunObject, RunStatus as ApiRunStatus,
    SubmitToolOutputsRunRequest, ToolsOutputs,
};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::{OpenAIConfig, PollingConfig};
use crate::error::{AssistantError, Result};
use crate::models::{
    FunctionCall, Message, MessageRole, Run, RunError, RunStatus, ToolCall, ToolOutput,
};

/// The hosted assistant's thread/run protocol. The `*_and_poll` calls only
/// return once the run is no longer queued or in progress.
#[async_trait]
pub trait AssistantService: Send + Sync {
    async fn create_thread(&self) -> Result<String>;

    async fn add_message(&self, thread_id: &str, role: MessageRole, content: &str) -> Result<()>;

    async fn create_and_poll_run(&self, thread_id: &str) -> Result<Run>;

    async fn submit_tool_outputs_and_poll(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Newest first.
    async fn list_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<Message>>;
}

/// Assistants v2 over `async-openai`
pub struct OpenAiAssistants {
    client: Client<ClientConfig>,
    assistant_id: String,
    polling: PollingConfig,
}

impl OpenAiAssistants {
    pub fn new(cfg: &OpenAIConfig, polling: PollingConfig, assistant_id: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AssistantError::Config(format!("Failed to build HTTP client: {e}")))?;

        let config = ClientConfig::new()
            .with_api_key(cfg.api_key.clone())
            .with_api_base(cfg.base_url.trim_end_matches('/'));
        // The client retries rate limits on its own; keep that inside the
        // same budget as run polling.
        let retries = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(polling.max_wait()))
            .build();
        let client = Client::with_config(config)
            .with_http_client(http)
            .with_backoff(retries);

        Ok(Self {
            client,
            assistant_id,
            polling,
        })
    }

    /// Reuse the configured assistant, or register a new one with `tools`.
    pub async fn connect(
        cfg: &OpenAIConfig,
        polling: PollingConfig,
        tools: &[FunctionObject],
    ) -> Result<Self> {
        let mut service = Self::new(cfg, polling, cfg.assistant_id.clone().unwrap_or_default())?;

        if service.assistant_id.is_empty() {
            let tools: Vec<AssistantTools> = tools
                .iter()
                .cloned()
                .map(|function| AssistantTools::Function(AssistantToolsFunction { function }))
                .collect();
            let request = CreateAssistantRequestArgs::default()
                .name(cfg.assistant_name.as_str())
                .instructions(cfg.instructions.as_str())
                .model(cfg.model.as_str())
                .tools(tools)
                .build()?;
            let assistant = service.client.assistants().create(request).await?;
            tracing::info!(
                assistant_id = %assistant.id,
                model = %cfg.model,
                "Created assistant"
            );
            service.assistant_id = assistant.id;
        } else {
            tracing::info!(assistant_id = %service.assistant_id, "Using configured assistant");
        }

        Ok(service)
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    /// Wait with exponential backoff until the run leaves the pending states.
    async fn wait_for_run(&self, mut run: Run) -> Result<Run> {
        let mut schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.polling.initial_interval())
            .with_max_interval(self.polling.max_interval())
            .with_max_elapsed_time(Some(self.polling.max_wait()))
            .build();

        while run.status.is_pending() {
            let Some(delay) = schedule.next_backoff() else {
                return Err(AssistantError::PollTimeout {
                    thread_id: run.thread_id,
                    run_id: run.id,
                    status: run.status,
                    waited_secs: self.polling.max_wait_secs,
                });
            };
            sleep(delay).await;
            run = self.retrieve_run(&run.thread_id, &run.id).await?;
            tracing::debug!(run_id = %run.id, status = %run.status, "Polled run");
        }

        Ok(run)
    }
}

#[async_trait]
impl AssistantService for OpenAiAssistants {
    async fn create_thread(&self) -> Result<String> {
        let thread = self
            .client
            .threads()
            .create(CreateThreadRequest::default())
            .await?;
        Ok(thread.id)
    }

    async fn add_message(&self, thread_id: &str, role: MessageRole, content: &str) -> Result<()> {
        let role = match role {
            MessageRole::User => ApiMessageRole::User,
            MessageRole::Assistant => ApiMessageRole::Assistant,
        };
        let request = CreateMessageRequestArgs::default()
            .role(role)
            .content(content.to_string())
            .build()?;
        self.client
            .threads()
            .messages(thread_id)
            .create(request)
            .await?;
        Ok(())
    }

    async fn create_and_poll_run(&self, thread_id: &str) -> Result<Run> {
        let request = CreateRunRequestArgs::default()
            .assistant_id(self.assistant_id.as_str())
            .build()?;
        let run = self.client.threads().runs(thread_id).create(request).await?;
        self.wait_for_run(run_from_api(run)).await
    }

    async fn submit_tool_outputs_and_poll(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        let request = SubmitToolOutputsRunRequest {
            tool_outputs: outputs
                .iter()
                .map(|output| ToolsOutputs {
                    tool_call_id: Some(output.tool_call_id.clone()),
                    output: Some(output.output.clone()),
                })
                .collect(),
            stream: None,
        };
        let run = self
            .client
            .threads()
            .runs(thread_id)
            .submit_tool_outputs(run_id, request)
            .await?;
        self.wait_for_run(run_from_api(run)).await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let run = self.client.threads().runs(thread_id).retrieve(run_id).await?;
        Ok(run_from_api(run))
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let run = self.client.threads().runs(thread_id).cancel(run_id).await?;
        Ok(run_from_api(run))
    }

    async fn list_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<Message>> {
        let query = [("order", "desc".to_string()), ("limit", limit.to_string())];
        let page = self
            .client
            .threads()
            .messages(thread_id)
            .list(&query)
            .await?;
        Ok(page.data.into_iter().map(message_from_api).collect())
    }
}

fn run_from_api(run: RunObject) -> Run {
    let tool_calls = run
        .required_action
        .map(|action| {
            action
                .submit_tool_outputs
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    function: FunctionCall {
                        name: call.function.name,
                        arguments: call.function.arguments,
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    Run {
        id: run.id,
        thread_id: run.thread_id,
        status: status_from_api(run.status),
        tool_calls,
        completed_at: run.completed_at.map(i64::from),
        last_error: run.last_error.map(|e| RunError {
            code: format!("{:?}", e.code),
            message: e.message,
        }),
    }
}

fn status_from_api(status: ApiRunStatus) -> RunStatus {
    match status {
        ApiRunStatus::Queued => RunStatus::Queued,
        ApiRunStatus::InProgress => RunStatus::InProgress,
        ApiRunStatus::RequiresAction => RunStatus::RequiresAction,
        ApiRunStatus::Cancelling => RunStatus::Cancelling,
        ApiRunStatus::Cancelled => RunStatus::Cancelled,
        ApiRunStatus::Failed => RunStatus::Failed,
        ApiRunStatus::Completed => RunStatus::Completed,
        ApiRunStatus::Incomplete => RunStatus::Incomplete,
        ApiRunStatus::Expired => RunStatus::Expired,
    }
}

fn message_from_api(message: MessageObject) -> Message {
    let role = match message.role {
        ApiMessageRole::User => MessageRole::User,
        ApiMessageRole::Assistant => MessageRole::Assistant,
    };
    let text = message.content.into_iter().rev().find_map(|part| match part {
        MessageContent::Text(part) => Some(part.text.value),
        _ => None,
    });
    Message { role, text }
}
