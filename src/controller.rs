use futures::future::join_all;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::{AssistantError, Result};
use crate::models::{ChatReply, ChatRequest, MessageRole, Run, RunStatus, ToolOutput};
use crate::registry::ToolRegistry;
use crate::transport::AssistantService;

/// Sent after a tool round so the assistant restates raw tool output as prose.
pub const RESTATE_INSTRUCTION: &str = "Use the tool output and try to answer the prompt \
as a sentence. If the information is not available, tell it. Do not mention about the tools. \
Imagine you are presenting the information to a user as a markdown. \
Mention the sources and url of any information at the last of the sentence. \
If the source and url are not available, no need to mention it. \
IMPORTANT: Do not give it as a json or a list. It should be only a sentence.";

/// Where one request is in its conversation round trip. Only used for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Starting,
    AwaitingRun,
    HandlingToolCalls,
    AwaitingFollowupRun,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Starting => "starting",
            Stage::AwaitingRun => "awaiting_run",
            Stage::HandlingToolCalls => "handling_tool_calls",
            Stage::AwaitingFollowupRun => "awaiting_followup_run",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Drives one user question through the assistant service, answering any
/// tool calls the run blocks on.
pub struct RunController {
    service: Arc<dyn AssistantService>,
    registry: Arc<ToolRegistry>,
}

impl RunController {
    pub fn new(service: Arc<dyn AssistantService>, registry: Arc<ToolRegistry>) -> Self {
        Self { service, registry }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply> {
        let thread_id = self.resolve_thread(&request).await?;

        tracing::debug!(stage = %Stage::AwaitingRun, %thread_id, "Submitting user message");
        let run = self.post_and_run(&thread_id, &request.message).await?;

        match run.status {
            RunStatus::Completed => {}
            RunStatus::RequiresAction => {
                if self.handle_tool_calls(&run).await? {
                    self.follow_up(&thread_id).await?;
                }
            }
            status => log_unfinished(&run, status),
        }

        let response = self.latest_reply(&thread_id).await?;
        tracing::info!(
            stage = %Stage::Done,
            %thread_id,
            answered = response.is_some(),
            "Conversation round finished"
        );
        Ok(ChatReply {
            id: thread_id,
            response,
        })
    }

    async fn resolve_thread(&self, request: &ChatRequest) -> Result<String> {
        if request.new_thread {
            let thread_id = self.service.create_thread().await?;
            tracing::info!(stage = %Stage::Starting, %thread_id, "Created conversation thread");
            return Ok(thread_id);
        }

        match request.thread_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(AssistantError::MissingThreadId),
        }
    }

    async fn post_and_run(&self, thread_id: &str, content: &str) -> Result<Run> {
        self.service
            .add_message(thread_id, MessageRole::User, content)
            .await?;
        let run = match self.service.create_and_poll_run(thread_id).await {
            Ok(run) => run,
            Err(e) => {
                if let AssistantError::PollTimeout {
                    thread_id, run_id, ..
                } = &e
                {
                    self.cancel(thread_id, run_id).await;
                }
                return Err(e);
            }
        };
        tracing::info!(run_id = %run.id, status = %run.status, "Run settled");
        Ok(run)
    }

    /// Answer every tool call on a blocked run and submit the outputs in one
    /// batch. Returns whether a tool round actually happened.
    async fn handle_tool_calls(&self, run: &Run) -> Result<bool> {
        let calls = &run.tool_calls;
        if calls.is_empty() {
            tracing::warn!(
                stage = %Stage::HandlingToolCalls,
                run_id = %run.id,
                "Run requires action but carries no tool calls"
            );
            self.abandon(run).await;
            return Ok(false);
        }

        // All arguments must parse before anything runs; a partial batch
        // would leave a call without its output.
        let mut parsed = Vec::with_capacity(calls.len());
        for call in calls {
            match serde_json::from_str::<Value>(&call.function.arguments) {
                Ok(args) => parsed.push((call, args)),
                Err(source) => {
                    tracing::error!(
                        tool = %call.function.name,
                        arguments = %call.function.arguments,
                        error = %source,
                        "Tool arguments are not valid JSON"
                    );
                    self.abandon(run).await;
                    return Err(AssistantError::ToolArguments {
                        tool: call.function.name.clone(),
                        source,
                    });
                }
            }
        }

        let dispatches = parsed.into_iter().map(|(call, args)| async move {
            let result = self.registry.dispatch(&call.function.name, args).await;
            ToolOutput {
                tool_call_id: call.id.clone(),
                output: result.to_string(),
            }
        });
        let outputs: Vec<ToolOutput> = join_all(dispatches).await;

        tracing::info!(
            stage = %Stage::HandlingToolCalls,
            run_id = %run.id,
            outputs = outputs.len(),
            "Submitting tool outputs"
        );
        let submitted = self
            .service
            .submit_tool_outputs_and_poll(&run.thread_id, &run.id, &outputs)
            .await;
        let after = self.abandon_on_error(run, submitted).await?;
        tracing::info!(
            run_id = %after.id,
            status = %after.status,
            "Run settled after tool outputs"
        );

        let latest = self.service.retrieve_run(&after.thread_id, &after.id).await;
        let latest = self.abandon_on_error(&after, latest).await?;
        if latest.completed_at.is_none()
            && (latest.status == RunStatus::RequiresAction || latest.status.is_pending())
        {
            self.abandon(&latest).await;
        }

        Ok(true)
    }

    async fn follow_up(&self, thread_id: &str) -> Result<()> {
        tracing::debug!(
            stage = %Stage::AwaitingFollowupRun,
            %thread_id,
            "Requesting restatement"
        );
        let run = self.post_and_run(thread_id, RESTATE_INSTRUCTION).await?;

        match run.status {
            RunStatus::Completed => Ok(()),
            RunStatus::RequiresAction => {
                self.abandon(&run).await;
                Err(AssistantError::RunFailed {
                    run_id: run.id.clone(),
                    status: run.status,
                    reason: "follow-up run requested another tool round".to_string(),
                })
            }
            status => {
                log_unfinished(&run, status);
                Ok(())
            }
        }
    }

    /// Pass `result` through, cancelling `run` first when it failed. A run
    /// whose follow-up call errored is otherwise left active on the thread.
    async fn abandon_on_error<T>(&self, run: &Run, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.abandon(run).await;
        }
        result
    }

    /// Cancel a run we are not going to resolve.
    async fn abandon(&self, run: &Run) {
        self.cancel(&run.thread_id, &run.id).await;
    }

    /// Failures are logged only; the caller is already on its way out.
    async fn cancel(&self, thread_id: &str, run_id: &str) {
        match self.service.cancel_run(thread_id, run_id).await {
            Ok(cancelled) => {
                tracing::info!(%run_id, status = %cancelled.status, "Cancelled run")
            }
            Err(e) => tracing::warn!(%run_id, error = %e, "Failed to cancel run"),
        }
    }

    /// Text of the newest message, if the assistant wrote it.
    async fn latest_reply(&self, thread_id: &str) -> Result<Option<String>> {
        let messages = self.service.list_messages(thread_id, 1).await?;
        Ok(messages
            .into_iter()
            .next()
            .filter(|message| message.role == MessageRole::Assistant)
            .and_then(|message| message.text))
    }
}

fn log_unfinished(run: &Run, status: RunStatus) {
    let reason = run
        .last_error
        .as_ref()
        .map(|e| format!("{}: {}", e.code, e.message))
        .unwrap_or_default();
    tracing::warn!(run_id = %run.id, %status, %reason, "Run ended without completing");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FunctionCall, Message, StableCoin, ToolCall};
    use crate::tools::source::MockDataSource;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    const THREAD: &str = "thread_abc";

    /// One scripted run result plus the assistant text it leaves behind.
    struct Step {
        run: Run,
        reply: Option<&'static str>,
        stalls: bool,
    }

    #[derive(Default)]
    struct ScriptedService {
        created_threads: Mutex<usize>,
        runs: Mutex<VecDeque<Step>>,
        after_submit: Mutex<VecDeque<Step>>,
        log: Mutex<Vec<(MessageRole, String)>>,
        known_runs: Mutex<HashMap<String, Run>>,
        submitted: Mutex<Vec<Vec<ToolOutput>>>,
        cancelled: Mutex<Vec<String>>,
        // operation name -> calls that succeed before it starts failing
        fail_after: Mutex<HashMap<&'static str, usize>>,
        calls: Mutex<HashMap<&'static str, usize>>,
    }

    impl ScriptedService {
        fn new(runs: Vec<Step>, after_submit: Vec<Step>) -> Self {
            Self {
                runs: Mutex::new(runs.into()),
                after_submit: Mutex::new(after_submit.into()),
                ..Self::default()
            }
        }

        fn failing(self, op: &'static str, successes: usize) -> Self {
            self.fail_after.lock().unwrap().insert(op, successes);
            self
        }

        fn check(&self, op: &'static str) -> Result<()> {
            let mut calls = self.calls.lock().unwrap();
            let seen = calls.entry(op).or_insert(0);
            *seen += 1;
            match self.fail_after.lock().unwrap().get(op) {
                Some(&successes) if *seen > successes => {
                    Err(AssistantError::Transport("connection reset".to_string()))
                }
                _ => Ok(()),
            }
        }

        fn play(&self, step: Option<Step>) -> Result<Run> {
            let step = step
                .ok_or_else(|| AssistantError::Transport("script exhausted".to_string()))?;
            if let Some(text) = step.reply {
                self.log
                    .lock()
                    .unwrap()
                    .push((MessageRole::Assistant, text.to_string()));
            }
            self.known_runs
                .lock()
                .unwrap()
                .insert(step.run.id.clone(), step.run.clone());
            if step.stalls {
                return Err(AssistantError::PollTimeout {
                    thread_id: step.run.thread_id,
                    run_id: step.run.id,
                    status: step.run.status,
                    waited_secs: 120,
                });
            }
            Ok(step.run)
        }

        fn user_messages(&self) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(role, _)| *role == MessageRole::User)
                .map(|(_, text)| text.clone())
                .collect()
        }

        fn cancelled(&self) -> Vec<String> {
            self.cancelled.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AssistantService for ScriptedService {
        async fn create_thread(&self) -> Result<String> {
            self.check("create_thread")?;
            *self.created_threads.lock().unwrap() += 1;
            Ok(THREAD.to_string())
        }

        async fn add_message(
            &self,
            _thread_id: &str,
            role: MessageRole,
            content: &str,
        ) -> Result<()> {
            self.check("add_message")?;
            self.log.lock().unwrap().push((role, content.to_string()));
            Ok(())
        }

        async fn create_and_poll_run(&self, _thread_id: &str) -> Result<Run> {
            self.check("create_and_poll_run")?;
            let step = self.runs.lock().unwrap().pop_front();
            self.play(step)
        }

        async fn submit_tool_outputs_and_poll(
            &self,
            _thread_id: &str,
            _run_id: &str,
            outputs: &[ToolOutput],
        ) -> Result<Run> {
            self.check("submit_tool_outputs_and_poll")?;
            self.submitted.lock().unwrap().push(outputs.to_vec());
            let step = self.after_submit.lock().unwrap().pop_front();
            self.play(step)
        }

        async fn retrieve_run(&self, _thread_id: &str, run_id: &str) -> Result<Run> {
            self.check("retrieve_run")?;
            self.known_runs
                .lock()
                .unwrap()
                .get(run_id)
                .cloned()
                .ok_or_else(|| AssistantError::Transport(format!("unknown run {run_id}")))
        }

        async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
            self.cancelled.lock().unwrap().push(run_id.to_string());
            let mut cancelled = self
                .known_runs
                .lock()
                .unwrap()
                .get(run_id)
                .cloned()
                .unwrap_or_else(|| run(run_id, RunStatus::Cancelling));
            cancelled.thread_id = thread_id.to_string();
            cancelled.status = RunStatus::Cancelled;
            Ok(cancelled)
        }

        async fn list_messages(&self, _thread_id: &str, limit: usize) -> Result<Vec<Message>> {
            self.check("list_messages")?;
            let log = self.log.lock().unwrap();
            Ok(log
                .iter()
                .rev()
                .take(limit)
                .map(|(role, text)| Message {
                    role: *role,
                    text: Some(text.clone()),
                })
                .collect())
        }
    }

    fn run(id: &str, status: RunStatus) -> Run {
        Run {
            id: id.to_string(),
            thread_id: THREAD.to_string(),
            status,
            tool_calls: Vec::new(),
            completed_at: (status == RunStatus::Completed).then_some(1_700_000_000),
            last_error: None,
        }
    }

    fn tool_run(id: &str, calls: &[(&str, &str, &str)]) -> Run {
        let tool_calls = calls
            .iter()
            .map(|(call_id, name, arguments)| ToolCall {
                id: call_id.to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            })
            .collect();
        Run {
            tool_calls,
            ..run(id, RunStatus::RequiresAction)
        }
    }

    fn step(run: Run, reply: Option<&'static str>) -> Step {
        Step {
            run,
            reply,
            stalls: false,
        }
    }

    fn stalled(run: Run) -> Step {
        Step {
            run,
            reply: None,
            stalls: true,
        }
    }

    fn controller(service: Arc<ScriptedService>, source: MockDataSource) -> RunController {
        RunController::new(service, Arc::new(ToolRegistry::new(Arc::new(source))))
    }

    fn new_chat(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            new_thread: true,
            thread_id: None,
        }
    }

    fn coin(name: &str, symbol: &str) -> StableCoin {
        StableCoin {
            name: name.to_string(),
            symbol: symbol.to_string(),
            price: 1.0,
            gecko_id: name.to_lowercase(),
        }
    }

    fn prices_source() -> MockDataSource {
        let mut source = MockDataSource::new();
        source
            .expect_stablecoin_prices()
            .times(1)
            .returning(|| Ok(serde_json::json!({"date": 1})));
        source
    }

    /// A single prices tool round that settles, then a completed follow-up.
    fn prices_round() -> ScriptedService {
        ScriptedService::new(
            vec![
                step(tool_run("run_1", &[("call_1", "Get_Stable_Coin_Prices", "{}")]), None),
                step(run("run_2", RunStatus::Completed), Some("Prices hover at $1.")),
            ],
            vec![step(run("run_1", RunStatus::Completed), Some("raw prices"))],
        )
    }

    #[tokio::test]
    async fn top_three_stablecoins_round_trip() {
        let answer = "The top three stablecoins are Tether (USDT), USD Coin (USDC) and Dai \
                      (DAI), each trading near $1 (source: DefiLlama).";
        let service = Arc::new(ScriptedService::new(
            vec![
                step(tool_run("run_1", &[("call_1", "Get_Stable_Coins", r#"{"top_m":3}"#)]), None),
                step(run("run_2", RunStatus::Completed), Some(answer)),
            ],
            vec![step(run("run_1", RunStatus::Completed), Some("[{\"Name\": \"Tether\"}]"))],
        ));
        let mut source = MockDataSource::new();
        source
            .expect_top_stablecoins()
            .with(eq(3))
            .times(1)
            .returning(|_| {
                Ok(vec![
                    coin("Tether", "USDT"),
                    coin("USD Coin", "USDC"),
                    coin("Dai", "DAI"),
                ])
            });

        let reply = controller(service.clone(), source)
            .chat(new_chat("top 3 stablecoins"))
            .await
            .unwrap();

        assert_eq!(reply.id, THREAD);
        let text = reply.response.expect("assistant answer");
        assert_eq!(text, answer);
        assert!(!text.contains('{') && !text.contains('['));

        let submitted = service.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].len(), 1);
        assert_eq!(submitted[0][0].tool_call_id, "call_1");
        let records: Value = serde_json::from_str(&submitted[0][0].output).unwrap();
        assert_eq!(records.as_array().unwrap().len(), 3);

        assert_eq!(*service.created_threads.lock().unwrap(), 1);
        assert_eq!(
            service.user_messages(),
            vec!["top 3 stablecoins".to_string(), RESTATE_INSTRUCTION.to_string()]
        );
        assert!(service.cancelled().is_empty());
    }

    #[tokio::test]
    async fn completed_run_skips_follow_up() {
        let service = Arc::new(ScriptedService::new(
            vec![step(run("run_1", RunStatus::Completed), Some("Hello there."))],
            vec![],
        ));

        let reply = controller(service.clone(), MockDataSource::new())
            .chat(new_chat("hi"))
            .await
            .unwrap();

        assert_eq!(reply.response.as_deref(), Some("Hello there."));
        assert_eq!(service.user_messages(), vec!["hi".to_string()]);
        assert!(service.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_tool_call_gets_exactly_one_output() {
        let service = Arc::new(ScriptedService::new(
            vec![
                step(
                    tool_run(
                        "run_1",
                        &[
                            ("call_a", "Get_Top_Pools_by_TVL", r#"{"top_n":2}"#),
                            ("call_b", "nonexistent_tool", "{}"),
                            ("call_c", "internet_search_tool", "{}"),
                        ],
                    ),
                    None,
                ),
                step(run("run_2", RunStatus::Completed), Some("Summary sentence.")),
            ],
            vec![step(run("run_1", RunStatus::Completed), Some("raw"))],
        ));
        let mut source = MockDataSource::new();
        source
            .expect_top_pools()
            .with(eq(2))
            .times(1)
            .returning(|_| Ok(vec![]));

        controller(service.clone(), source)
            .chat(new_chat("pools and news"))
            .await
            .unwrap();

        let submitted = service.submitted.lock().unwrap();
        let ids: Vec<&str> = submitted[0].iter().map(|o| o.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b", "call_c"]);
        assert_eq!(submitted[0][0].output, r#"{"pools":[]}"#);
        assert!(submitted[0][1].output.contains("is not recognized"));
        assert!(submitted[0][2].output.contains("Error executing internet_search_tool"));
    }

    #[tokio::test]
    async fn unparseable_arguments_abort_without_submitting() {
        let service = Arc::new(ScriptedService::new(
            vec![step(
                tool_run(
                    "run_1",
                    &[
                        ("call_a", "Get_Stable_Coins", r#"{"top_m":3}"#),
                        ("call_b", "Get_Top_Pools_by_TVL", "{not json"),
                    ],
                ),
                None,
            )],
            vec![],
        ));

        let err = controller(service.clone(), MockDataSource::new())
            .chat(new_chat("broken"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AssistantError::ToolArguments { ref tool, .. } if tool == "Get_Top_Pools_by_TVL"
        ));
        assert!(service.submitted.lock().unwrap().is_empty());
        assert_eq!(service.cancelled(), vec!["run_1".to_string()]);
    }

    #[tokio::test]
    async fn resuming_without_thread_id_is_a_usage_error() {
        let service = Arc::new(ScriptedService::default());
        let request = ChatRequest {
            message: "again".to_string(),
            new_thread: false,
            thread_id: None,
        };

        let err = controller(service.clone(), MockDataSource::new())
            .chat(request)
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::MissingThreadId));
        assert!(service.log.lock().unwrap().is_empty());
        assert_eq!(*service.created_threads.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn resuming_uses_supplied_thread() {
        let service = Arc::new(ScriptedService::new(
            vec![step(run("run_1", RunStatus::Completed), Some("Welcome back."))],
            vec![],
        ));
        let request = ChatRequest {
            message: "again".to_string(),
            new_thread: false,
            thread_id: Some("thread_existing".to_string()),
        };

        let reply = controller(service.clone(), MockDataSource::new())
            .chat(request)
            .await
            .unwrap();

        assert_eq!(reply.id, "thread_existing");
        assert_eq!(*service.created_threads.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn follow_up_asking_for_tools_is_cancelled_and_fails() {
        let service = Arc::new(ScriptedService::new(
            vec![
                step(tool_run("run_1", &[("call_1", "Get_Stable_Coin_Prices", "{}")]), None),
                step(tool_run("run_2", &[("call_2", "Get_Stable_Coin_Prices", "{}")]), None),
            ],
            vec![step(run("run_1", RunStatus::Completed), Some("raw prices"))],
        ));

        let err = controller(service.clone(), prices_source())
            .chat(new_chat("prices"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AssistantError::RunFailed { ref run_id, status: RunStatus::RequiresAction, .. }
                if run_id == "run_2"
        ));
        assert_eq!(service.cancelled(), vec!["run_2".to_string()]);
    }

    #[tokio::test]
    async fn failed_run_returns_no_text_and_no_follow_up() {
        let service = Arc::new(ScriptedService::new(
            vec![step(run("run_1", RunStatus::Failed), None)],
            vec![],
        ));

        let reply = controller(service.clone(), MockDataSource::new())
            .chat(new_chat("anything"))
            .await
            .unwrap();

        assert_eq!(reply.response, None);
        assert_eq!(service.user_messages().len(), 1);
    }

    #[tokio::test]
    async fn action_without_tool_calls_is_cancelled() {
        let blocked = run("run_1", RunStatus::RequiresAction);
        let service = Arc::new(ScriptedService::new(vec![step(blocked, None)], vec![]));

        let reply = controller(service.clone(), MockDataSource::new())
            .chat(new_chat("odd"))
            .await
            .unwrap();

        assert_eq!(reply.response, None);
        assert_eq!(service.cancelled(), vec!["run_1".to_string()]);
        assert!(service.submitted.lock().unwrap().is_empty());
        assert_eq!(service.user_messages().len(), 1);
    }

    #[tokio::test]
    async fn run_left_blocked_after_submission_is_cancelled() {
        let service = Arc::new(ScriptedService::new(
            vec![
                step(tool_run("run_1", &[("call_1", "Get_Stable_Coin_Prices", "{}")]), None),
                step(run("run_2", RunStatus::Completed), Some("Prices hover at $1.")),
            ],
            vec![step(
                tool_run("run_1", &[("call_9", "Get_Stable_Coin_Prices", "{}")]),
                None,
            )],
        ));

        let reply = controller(service.clone(), prices_source())
            .chat(new_chat("prices"))
            .await
            .unwrap();

        assert_eq!(reply.response.as_deref(), Some("Prices hover at $1."));
        assert_eq!(service.cancelled(), vec!["run_1".to_string()]);
    }

    #[tokio::test]
    async fn failed_submission_cancels_the_blocked_run() {
        let service = Arc::new(prices_round().failing("submit_tool_outputs_and_poll", 0));

        let err = controller(service.clone(), prices_source())
            .chat(new_chat("prices"))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Transport(ref msg) if msg == "connection reset"));
        assert_eq!(service.cancelled(), vec!["run_1".to_string()]);
        assert_eq!(service.user_messages(), vec!["prices".to_string()]);
    }

    #[tokio::test]
    async fn failed_recheck_after_submission_cancels_the_run() {
        let service = Arc::new(prices_round().failing("retrieve_run", 0));

        let err = controller(service.clone(), prices_source())
            .chat(new_chat("prices"))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Transport(_)));
        assert_eq!(service.cancelled(), vec!["run_1".to_string()]);
    }

    #[tokio::test]
    async fn stalled_run_is_cancelled_by_id() {
        let service = Arc::new(ScriptedService::new(
            vec![stalled(run("run_1", RunStatus::InProgress))],
            vec![],
        ));

        let err = controller(service.clone(), MockDataSource::new())
            .chat(new_chat("slow"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AssistantError::PollTimeout { ref run_id, status: RunStatus::InProgress, .. }
                if run_id == "run_1"
        ));
        assert_eq!(service.cancelled(), vec!["run_1".to_string()]);
        assert!(service.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stalled_follow_up_is_cancelled_by_id() {
        let service = Arc::new(ScriptedService::new(
            vec![
                step(tool_run("run_1", &[("call_1", "Get_Stable_Coin_Prices", "{}")]), None),
                stalled(run("run_2", RunStatus::Queued)),
            ],
            vec![step(run("run_1", RunStatus::Completed), Some("raw prices"))],
        ));

        let err = controller(service.clone(), prices_source())
            .chat(new_chat("prices"))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::PollTimeout { ref run_id, .. } if run_id == "run_2"));
        assert_eq!(service.cancelled(), vec!["run_2".to_string()]);
    }

    #[tokio::test]
    async fn failed_restatement_message_is_an_error() {
        // the user message goes through, the restate instruction does not
        let service = Arc::new(prices_round().failing("add_message", 1));

        let err = controller(service.clone(), prices_source())
            .chat(new_chat("prices"))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Transport(_)));
        assert_eq!(service.submitted.lock().unwrap().len(), 1);
        assert_eq!(service.user_messages(), vec!["prices".to_string()]);
        assert!(service.cancelled().is_empty());
    }

    #[tokio::test]
    async fn failed_message_listing_is_an_error() {
        let service = Arc::new(
            ScriptedService::new(
                vec![step(run("run_1", RunStatus::Completed), Some("Hello there."))],
                vec![],
            )
            .failing("list_messages", 0),
        );

        let err = controller(service.clone(), MockDataSource::new())
            .chat(new_chat("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Transport(ref msg) if msg == "connection reset"));
    }

    #[tokio::test]
    async fn failed_thread_creation_sends_nothing() {
        let service = Arc::new(ScriptedService::default().failing("create_thread", 0));

        let err = controller(service.clone(), MockDataSource::new())
            .chat(new_chat("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Transport(_)));
        assert!(service.log.lock().unwrap().is_empty());
    }
}
