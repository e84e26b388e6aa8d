//! 回合编排器：Planning → Narrating → Extracting
//!
//! - Planning：带全部工具的非流式调用，最多 max_planning_iterations 次；某次没有工具调用即提前结束，
//!   预算用尽仍在请求工具时照常进入 Narrating（记为 cutoff）。
//! - Narrating：追加叙述指令后发起流式调用（不带工具），每个非空片段转发给调用方并同时累加，
//!   结束后整段文本作为 assistant 消息写入历史。
//! - Extracting：追加抽取指令，只提供 save_itinerary；解析与校验成功才整体替换行程，其余情况只记日志。
//!
//! 每次提供方调用与每次流读取都与取消令牌竞争；取消后不再发起新的调用。

use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChatSection;
use crate::core::{
    ChatError, ExtractionOutcome, NarrationReport, PlanningReport, ReplyReport, TurnPhase, TurnReport,
};
use crate::llm::{ChatRequest, DeltaAccumulator, LlmClient};
use crate::memory::{Conversation, Itinerary, Message};
use crate::tools::{save_itinerary_spec, ToolExecutor, ToolOutcome, ToolSpec, SAVE_ITINERARY};

/// 与取消令牌竞争；令牌先触发则返回 Cancelled
async fn race<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, ChatError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::Cancelled),
        out = fut => Ok(out),
    }
}

/// 叙述阶段失败时仍要尝试抽取；规划失败与取消则跳过
pub fn should_extract(result: &Result<ReplyReport, ChatError>) -> bool {
    match result {
        Ok(_) => true,
        Err(ChatError::Llm { phase, .. }) => *phase == TurnPhase::Narrating,
        Err(_) => false,
    }
}

/// 回合编排器：持有 LLM 客户端、工具执行器与编排参数，本身无会话状态
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    max_planning_iterations: usize,
    narration_instruction: String,
    extraction_instruction: String,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolExecutor>, chat: &ChatSection) -> Self {
        Self {
            llm,
            tools,
            max_planning_iterations: chat.max_planning_iterations.max(1),
            narration_instruction: chat.narration_instruction.clone(),
            extraction_instruction: chat.extraction_instruction.clone(),
        }
    }

    /// 客户端累计用量 (prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 完整回合：供非流式调用方与测试使用。叙述失败时抽取仍会执行，但错误照常返回
    pub async fn run_turn(
        &self,
        conv: &mut Conversation,
        content: &str,
        fragments: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, ChatError> {
        let reply = self.stream_reply(conv, content, fragments, cancel).await;
        let extraction = if should_extract(&reply) {
            self.extract_itinerary(conv, cancel).await
        } else {
            ExtractionOutcome::Skipped
        };
        reply.map(|r| TurnReport {
            planning: r.planning,
            narration: r.narration,
            extraction,
        })
    }

    /// 客户端可见部分：写入用户消息、规划、流式叙述。返回时 fragments 随之 drop，通道关闭
    pub async fn stream_reply(
        &self,
        conv: &mut Conversation,
        content: &str,
        fragments: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<ReplyReport, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidInput("content must not be empty".to_string()));
        }
        conv.push(Message::user(content))?;

        let planning = self.plan(conv, cancel).await?;
        let narration = self.narrate(conv, &fragments, cancel).await?;
        Ok(ReplyReport { planning, narration })
    }

    async fn plan(&self, conv: &mut Conversation, cancel: &CancellationToken) -> Result<PlanningReport, ChatError> {
        let specs: Vec<ToolSpec> = self.tools.specs();
        let mut report = PlanningReport::default();

        for iteration in 1..=self.max_planning_iterations {
            report.iterations = iteration;
            info!(chat_id = %conv.id(), phase = %TurnPhase::Planning, iteration, "planning call");

            let request = ChatRequest::new(conv.model().name.clone(), conv.messages().to_vec())
                .with_tools(specs.clone());
            let reply = race(cancel, self.llm.complete(request))
                .await?
                .map_err(|e| ChatError::llm(TurnPhase::Planning, e))?;

            if !reply.has_tool_calls() {
                conv.push(Message::assistant(reply.content))?;
                return Ok(report);
            }

            let calls = reply.tool_calls.clone();
            report.tool_calls += calls.len();
            conv.push(Message::assistant_with_tools(reply.content, reply.tool_calls))?;

            // 取消时未完成的调用也会得到 Failure，每个调用都有结果写回
            let outcomes = self.tools.invoke_batch(&calls, cancel).await;
            for (call, outcome) in calls.iter().zip(outcomes) {
                debug!(chat_id = %conv.id(), tool = %call.name, call_id = %call.id, ok = outcome.is_success(), "tool result");
                conv.push(Message::tool(call.id.clone(), outcome.to_content()))?;
            }
            if cancel.is_cancelled() {
                return Err(ChatError::Cancelled);
            }
        }

        report.cutoff = true;
        warn!(
            chat_id = %conv.id(),
            iterations = report.iterations,
            "planning budget exhausted while tools were still requested, narrating anyway"
        );
        Ok(report)
    }

    async fn narrate(
        &self,
        conv: &mut Conversation,
        fragments: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<NarrationReport, ChatError> {
        conv.push(Message::user(self.narration_instruction.clone()))?;
        info!(chat_id = %conv.id(), phase = %TurnPhase::Narrating, "narration stream");

        let request = ChatRequest::new(conv.model().name.clone(), conv.messages().to_vec());
        let mut stream = race(cancel, self.llm.complete_stream(request))
            .await?
            .map_err(|e| ChatError::llm(TurnPhase::Narrating, e))?;

        let mut acc = DeltaAccumulator::new();
        let outcome: Result<(), ChatError> = loop {
            let next = match race(cancel, stream.next()).await {
                Ok(next) => next,
                Err(e) => break Err(e),
            };
            match next {
                None => break Ok(()),
                Some(Err(e)) => break Err(ChatError::llm(TurnPhase::Narrating, e)),
                Some(Ok(delta)) => {
                    let Some(text) = acc.push(&delta) else {
                        continue;
                    };
                    match race(cancel, fragments.send(text.to_string())).await {
                        Ok(Ok(())) => {}
                        // 接收端已关闭即客户端离开
                        Ok(Err(_)) | Err(_) => break Err(ChatError::Cancelled),
                    }
                }
            }
        };

        let report = NarrationReport {
            chars: acc.text().chars().count(),
            fragments: acc.fragments(),
        };
        let text = acc.finish().content;

        match outcome {
            Ok(()) => {
                conv.push(Message::assistant(text))?;
                Ok(report)
            }
            Err(e) => {
                warn!(chat_id = %conv.id(), error = %e, forwarded = report.fragments, "narration aborted");
                if !text.is_empty() {
                    conv.push(Message::assistant(text))?;
                }
                Err(e)
            }
        }
    }

    /// 尽力抽取行程；任何失败都只体现在返回值与日志里
    pub async fn extract_itinerary(&self, conv: &mut Conversation, cancel: &CancellationToken) -> ExtractionOutcome {
        if cancel.is_cancelled() {
            return ExtractionOutcome::Skipped;
        }
        if let Err(e) = conv.push(Message::user(self.extraction_instruction.clone())) {
            warn!(chat_id = %conv.id(), error = %e, "extraction skipped");
            return ExtractionOutcome::Skipped;
        }
        info!(chat_id = %conv.id(), phase = %TurnPhase::Extracting, "extraction call");

        let request = ChatRequest::new(conv.model().name.clone(), conv.messages().to_vec())
            .with_tools(vec![save_itinerary_spec()]);
        let reply = match race(cancel, self.llm.complete(request)).await {
            Err(_) => return ExtractionOutcome::Skipped,
            Ok(Err(e)) => {
                warn!(chat_id = %conv.id(), error = %e, "extraction call failed");
                return ExtractionOutcome::ProviderFailed(e.to_string());
            }
            Ok(Ok(reply)) => reply,
        };

        if !reply.has_tool_calls() {
            info!(chat_id = %conv.id(), "no itinerary extracted this turn");
            return ExtractionOutcome::NoToolCall;
        }

        let mut saved: Option<Itinerary> = None;
        let mut last_error = String::new();
        let mut results = Vec::with_capacity(reply.tool_calls.len());
        for call in &reply.tool_calls {
            let outcome = if call.name != SAVE_ITINERARY {
                ToolOutcome::Failure {
                    error: format!("Unknown tool: {}", call.name),
                }
            } else {
                match Itinerary::from_arguments(&call.arguments) {
                    Ok(itinerary) => {
                        saved = Some(itinerary);
                        ToolOutcome::Success(json!({ "status": "saved" }))
                    }
                    Err(e) => ToolOutcome::Failure { error: e.to_string() },
                }
            };
            if let ToolOutcome::Failure { error } = &outcome {
                warn!(chat_id = %conv.id(), call_id = %call.id, error = %error, "itinerary rejected");
                last_error = error.clone();
            }
            results.push((call.id.clone(), outcome.to_content()));
        }

        let pushed = conv
            .push(Message::assistant_with_tools(reply.content, reply.tool_calls))
            .and_then(|_| {
                results
                    .into_iter()
                    .try_for_each(|(id, content)| conv.push(Message::tool(id, content)))
            });
        if let Err(e) = pushed {
            warn!(chat_id = %conv.id(), error = %e, "extraction history rejected");
            return ExtractionOutcome::Rejected(e.to_string());
        }

        match saved {
            Some(itinerary) => {
                info!(chat_id = %conv.id(), destination = %itinerary.destination, days = itinerary.days.len(), "itinerary updated");
                conv.replace_itinerary(itinerary);
                ExtractionOutcome::Updated
            }
            None => ExtractionOutcome::Rejected(last_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    use crate::llm::{LlmError, MockLlmClient, MockTurn};
    use crate::memory::{ModelProfile, Role};
    use crate::tools::{Tool, ToolError, ToolRegistry};

    const COORG: &str = r#"{"destination": "Coorg", "days": [{"day": 1, "items": [{"title": "Abbey Falls"}]}]}"#;

    struct FixedGeocode;

    #[async_trait]
    impl Tool for FixedGeocode {
        fn name(&self) -> &str {
            "get_geocode_data"
        }

        fn description(&self) -> &str {
            "fixed coordinates"
        }

        async fn call(&self, _arguments: &str) -> Result<Value, ToolError> {
            Ok(json!([{"display_name": "Paris", "lat": 48.85, "lon": 2.35}]))
        }
    }

    struct SlowLookup;

    #[async_trait]
    impl Tool for SlowLookup {
        fn name(&self) -> &str {
            "slow_lookup"
        }

        fn description(&self) -> &str {
            "never answers in time"
        }

        async fn call(&self, _arguments: &str) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }
    }

    fn setup(turns: Vec<MockTurn>, max_iterations: usize) -> (Orchestrator, Arc<MockLlmClient>) {
        let mock = Arc::new(MockLlmClient::scripted(turns));
        let mut registry = ToolRegistry::new();
        registry.register(FixedGeocode);
        let tools = Arc::new(ToolExecutor::new(registry, 5, 3));
        let chat = ChatSection {
            max_planning_iterations: max_iterations,
            ..ChatSection::default()
        };
        (Orchestrator::new(mock.clone(), tools, &chat), mock)
    }

    fn conversation() -> Conversation {
        Conversation::new(
            "c1",
            ModelProfile {
                name: "gpt-4o-mini".to_string(),
                system_prompt: "You plan trips.".to_string(),
            },
        )
    }

    async fn turn(orch: &Orchestrator, conv: &mut Conversation, content: &str) -> (Result<TurnReport, ChatError>, Vec<String>) {
        let (tx, mut rx) = mpsc::channel(64);
        let result = orch.run_turn(conv, content, tx, &CancellationToken::new()).await;
        let mut received = Vec::new();
        while let Some(fragment) = rx.recv().await {
            received.push(fragment);
        }
        (result, received)
    }

    fn assert_referential_integrity(conv: &Conversation) {
        for (i, msg) in conv.messages().iter().enumerate() {
            if msg.role == Role::Tool {
                let id = msg.tool_call_id.as_deref().unwrap();
                assert!(conv.messages()[..i]
                    .iter()
                    .any(|m| m.role == Role::Assistant && m.tool_calls.iter().any(|c| c.id == id)));
            }
        }
    }

    #[tokio::test]
    async fn test_no_tool_calls_goes_straight_to_narration() {
        let (orch, mock) = setup(
            vec![
                MockTurn::text("Let me put that together."),
                MockTurn::stream(&["Day ", "1: ", "Paris"]),
                MockTurn::text("Nothing to save."),
            ],
            3,
        );
        let mut conv = conversation();
        let (result, received) = turn(&orch, &mut conv, "  Paris for a day  ").await;
        let report = result.unwrap();

        assert_eq!(report.planning.iterations, 1);
        assert!(!report.planning.cutoff);
        assert_eq!(report.extraction, ExtractionOutcome::NoToolCall);
        assert_eq!(received.concat(), "Day 1: Paris");

        let calls = mock.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].tools, vec!["get_geocode_data".to_string()]);
        assert!(calls[1].streaming && calls[1].tools.is_empty());
        assert_eq!(calls[2].tools, vec![SAVE_ITINERARY.to_string()]);

        let history = conv.messages();
        assert_eq!(history.len(), 6);
        assert_eq!(history[1].content, "Paris for a day");
        assert_eq!(history[2].content, "Let me put that together.");
        assert_eq!(history[3].role, Role::User);
        assert_eq!(history[4].content, "Day 1: Paris");
        assert!(conv.itinerary().is_none());
    }

    #[tokio::test]
    async fn test_planning_stops_at_iteration_cap() {
        let (orch, mock) = setup(
            vec![
                MockTurn::tool_calls(vec![
                    ("call_1", "get_geocode_data", "{}"),
                    ("call_2", "find_hotels", "{}"),
                ]),
                MockTurn::tool_call("call_3", "get_geocode_data", "{}"),
                MockTurn::stream(&["Here is your plan."]),
                MockTurn::text("no"),
            ],
            2,
        );
        let mut conv = conversation();
        let (result, _) = turn(&orch, &mut conv, "Paris").await;
        let report = result.unwrap();

        assert_eq!(report.planning.iterations, 2);
        assert_eq!(report.planning.tool_calls, 3);
        assert!(report.planning.cutoff);
        let calls = mock.calls();
        assert!(!calls[1].streaming);
        assert!(calls[2].streaming);

        let tool_messages: Vec<&Message> = conv.messages().iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_messages.len(), 3);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("call_2"));
        assert!(tool_messages[1].content.contains("Unknown tool: find_hotels"));
        assert_referential_integrity(&conv);
    }

    #[tokio::test]
    async fn test_successful_extraction_replaces_itinerary_and_failure_keeps_it() {
        let (orch, _) = setup(
            vec![
                MockTurn::text("ok"),
                MockTurn::stream(&["Coorg plan"]),
                MockTurn::tool_call("save_1", SAVE_ITINERARY, COORG),
                MockTurn::text("ok"),
                MockTurn::stream(&["Changed"]),
                MockTurn::tool_call("save_2", SAVE_ITINERARY, r#"{"destination": "Goa", "days": []}"#),
            ],
            3,
        );
        let mut conv = conversation();

        let (first, _) = turn(&orch, &mut conv, "Coorg for a day").await;
        assert!(first.unwrap().extraction.updated());
        assert_eq!(conv.itinerary().map(|i| i.destination.as_str()), Some("Coorg"));

        let before = conv.len();
        let (second, received) = turn(&orch, &mut conv, "Make it Goa").await;
        assert!(matches!(second.unwrap().extraction, ExtractionOutcome::Rejected(_)));
        assert_eq!(received, vec!["Changed".to_string()]);
        assert_eq!(conv.itinerary().map(|i| i.destination.as_str()), Some("Coorg"));

        let last = conv.messages().last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.content.contains("error"));
        assert!(conv.len() > before);
        assert_referential_integrity(&conv);
    }

    #[tokio::test]
    async fn test_planning_failure_aborts_before_any_fragment() {
        let (orch, mock) = setup(vec![MockTurn::Fail(LlmError::Api("rate limited".into()))], 3);
        let mut conv = conversation();
        let (result, received) = turn(&orch, &mut conv, "Paris").await;

        assert!(matches!(
            result,
            Err(ChatError::Llm {
                phase: TurnPhase::Planning,
                ..
            })
        ));
        assert!(received.is_empty());
        assert_eq!(mock.calls().len(), 1);
        assert_eq!(conv.len(), 2);
    }

    #[tokio::test]
    async fn test_narration_failure_keeps_partial_text_and_still_extracts() {
        let (orch, mock) = setup(
            vec![
                MockTurn::text("ok"),
                MockTurn::StreamThenFail(vec!["Day ".into(), "1".into()], LlmError::Stream("reset".into())),
                MockTurn::tool_call("save_1", SAVE_ITINERARY, COORG),
            ],
            3,
        );
        let mut conv = conversation();
        let (result, received) = turn(&orch, &mut conv, "Coorg").await;

        assert!(matches!(
            result,
            Err(ChatError::Llm {
                phase: TurnPhase::Narrating,
                ..
            })
        ));
        assert_eq!(received.concat(), "Day 1");
        assert_eq!(mock.calls().len(), 3);
        assert!(conv.itinerary().is_some());
        assert!(conv
            .messages()
            .iter()
            .any(|m| m.role == Role::Assistant && m.content == "Day 1"));
    }

    #[tokio::test]
    async fn test_empty_content_is_rejected_without_mutation() {
        let (orch, mock) = setup(Vec::new(), 3);
        let mut conv = conversation();
        let (result, _) = turn(&orch, &mut conv, "   ").await;
        assert!(matches!(result, Err(ChatError::InvalidInput(_))));
        assert_eq!(conv.len(), 1);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn_issues_no_calls_and_skips_extraction() {
        let (orch, mock) = setup(Vec::new(), 3);
        let mut conv = conversation();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(4);

        let result = orch.run_turn(&mut conv, "Paris", tx, &cancel).await;
        assert!(matches!(result, Err(ChatError::Cancelled)));
        assert!(mock.calls().is_empty());
        assert_eq!(conv.len(), 2);
    }

    #[tokio::test]
    async fn test_history_strictly_extends_across_turns() {
        let (orch, _) = setup(Vec::new(), 3);
        let mut conv = conversation();
        let (first, _) = turn(&orch, &mut conv, "Paris").await;
        first.unwrap();
        let snapshot: Vec<String> = conv.messages().iter().map(|m| m.content.clone()).collect();

        let (second, _) = turn(&orch, &mut conv, "Rome").await;
        second.unwrap();
        assert!(conv.len() > snapshot.len());
        for (i, content) in snapshot.iter().enumerate() {
            assert_eq!(&conv.messages()[i].content, content);
        }
    }

    #[tokio::test]
    async fn test_cancel_during_tool_batch_answers_every_call() {
        let mock = Arc::new(MockLlmClient::scripted(vec![MockTurn::tool_calls(vec![
            ("call_1", "slow_lookup", "{}"),
            ("call_2", "slow_lookup", "{}"),
        ])]));
        let mut registry = ToolRegistry::new();
        registry.register(SlowLookup);
        let tools = Arc::new(ToolExecutor::new(registry, 60, 3));
        let orch = Orchestrator::new(mock.clone(), tools, &ChatSection::default());
        let mut conv = conversation();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let (tx, _rx) = mpsc::channel(4);
        let result = tokio::time::timeout(Duration::from_secs(2), orch.run_turn(&mut conv, "Paris", tx, &cancel))
            .await
            .unwrap();

        assert!(matches!(result, Err(ChatError::Cancelled)));
        assert_eq!(mock.calls().len(), 1);
        let tool_messages: Vec<&Message> = conv.messages().iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_messages.len(), 2);
        assert!(tool_messages.iter().all(|m| m.content.contains("cancelled")));
        assert_referential_integrity(&conv);
    }
}
