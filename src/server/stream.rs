//! 流式桥：后台回合任务 → HTTP 响应体
//!
//! 生产端是一个 tokio 任务：锁住对话，跑 Planning + Narrating，把片段写进有界通道，
//! 返回后（通道随之关闭）通过 oneshot 发出完成信号，再继续做抽取。
//! 消费端在一次 select 中同时等待取消、下一个片段与完成信号；完成信号先到时先把通道里剩余片段读完。
//! 响应体被 drop（客户端断开）时 DropGuard 取消回合令牌，生产端不再发起新的提供方调用。

use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{stream, Stream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::core::{should_extract, ChatError, ConversationHandle, Orchestrator, ReplyReport};
use crate::server::sse;

/// 消费端看到的事件
#[derive(Debug)]
pub enum StreamEvent {
    Fragment(String),
    Finished(ReplyReport),
    Failed(ChatError),
}

impl From<Result<ReplyReport, ChatError>> for StreamEvent {
    fn from(result: Result<ReplyReport, ChatError>) -> Self {
        match result {
            Ok(report) => StreamEvent::Finished(report),
            Err(e) => StreamEvent::Failed(e),
        }
    }
}

/// 一个回合的消费端
pub struct TurnStream {
    fragments: mpsc::Receiver<String>,
    done: oneshot::Receiver<Result<ReplyReport, ChatError>>,
    cancel: CancellationToken,
    closed: bool,
    done_received: bool,
    outcome: Option<Result<ReplyReport, ChatError>>,
    finished: bool,
}

/// 启动回合任务并返回消费端；同一对话的回合在对话锁上排队
pub fn spawn_turn(
    orchestrator: Arc<Orchestrator>,
    conversation: ConversationHandle,
    content: String,
    cancel: CancellationToken,
    buffer: usize,
) -> TurnStream {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let (done_tx, done_rx) = oneshot::channel();
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut conv = tokio::select! {
            biased;
            _ = token.cancelled() => {
                let _ = done_tx.send(Err(ChatError::Cancelled));
                return;
            }
            guard = conversation.lock_owned() => guard,
        };

        let reply = orchestrator.stream_reply(&mut conv, &content, tx, &token).await;
        let extract = should_extract(&reply);
        if done_tx.send(reply).is_err() {
            debug!(chat_id = %conv.id(), "stream consumer already gone");
        }

        if extract {
            let outcome = orchestrator.extract_itinerary(&mut conv, &token).await;
            let (prompt_tokens, completion_tokens, _) = orchestrator.token_usage();
            info!(chat_id = %conv.id(), ?outcome, prompt_tokens, completion_tokens, "turn finished");
        }
    });

    TurnStream {
        fragments: rx,
        done: done_rx,
        cancel,
        closed: false,
        done_received: false,
        outcome: None,
        finished: false,
    }
}

impl TurnStream {
    /// 下一个事件；Finished / Failed 之后返回 None
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(result) = self.outcome.take() {
                // 完成信号已到，片段按顺序读完后再交出结果
                return match self.fragments.recv().await {
                    Some(fragment) => {
                        self.outcome = Some(result);
                        Some(StreamEvent::Fragment(fragment))
                    }
                    None => {
                        self.finished = true;
                        Some(result.into())
                    }
                };
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.finished = true;
                    return Some(StreamEvent::Failed(ChatError::Cancelled));
                }
                fragment = self.fragments.recv(), if !self.closed => match fragment {
                    Some(fragment) => return Some(StreamEvent::Fragment(fragment)),
                    None => self.closed = true,
                },
                done = &mut self.done, if !self.done_received => {
                    self.done_received = true;
                    let result = done.unwrap_or_else(|_| {
                        Err(ChatError::Integrity("turn task exited without a result".to_string()))
                    });
                    if self.closed {
                        self.finished = true;
                        return Some(result.into());
                    }
                    self.outcome = Some(result);
                }
            }
        }
    }
}

struct BodyState {
    turn: TurnStream,
    pending: Option<StreamEvent>,
    guard: Option<DropGuard>,
    surface_cutoff: bool,
}

impl BodyState {
    /// 生产端给出了结果，响应体之后被 drop 不应再取消抽取
    fn disarm(&mut self) {
        if let Some(guard) = self.guard.take() {
            let _ = guard.disarm();
        }
    }
}

/// 空闲时的保活注释间隔
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// 把回合消费端变成 SSE 事件流。first 是处理函数已经取出的第一个事件
pub fn sse_events(
    first: Option<StreamEvent>,
    turn: TurnStream,
    guard: DropGuard,
    surface_cutoff: bool,
) -> impl Stream<Item = Result<Event, ChatError>> + Send + 'static {
    let state = BodyState {
        turn,
        pending: first,
        guard: Some(guard),
        surface_cutoff,
    };
    stream::unfold(state, |mut state| async move {
        let event = match state.pending.take() {
            Some(event) => Some(event),
            None => state.turn.next_event().await,
        };
        match event? {
            StreamEvent::Fragment(fragment) => Some((Ok(sse::fragment_event(&fragment)), state)),
            StreamEvent::Finished(report) => {
                state.disarm();
                if state.surface_cutoff && report.planning.cutoff {
                    let note = format!("planning-cutoff after {} iterations", report.planning.iterations);
                    Some((Ok(sse::comment_event(&note)), state))
                } else {
                    None
                }
            }
            StreamEvent::Failed(ChatError::Cancelled) => None,
            StreamEvent::Failed(e) => {
                state.disarm();
                Some((Err(e), state))
            }
        }
    })
}

/// SSE 响应：事件流 + 保活
pub fn sse_body(
    first: Option<StreamEvent>,
    turn: TurnStream,
    guard: DropGuard,
    surface_cutoff: bool,
) -> Sse<impl Stream<Item = Result<Event, ChatError>> + Send + 'static> {
    Sse::new(sse_events(first, turn, guard, surface_cutoff))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("keepalive"))
}
