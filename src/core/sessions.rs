//! 聊天会话表：chat_id → 对话状态
//!
//! 每个对话包在 tokio Mutex 里：同一对话的回合串行执行（后到的回合等前一个抽取完成），
//! 不同对话互不阻塞。只在内存中保存，进程退出即丢弃；空闲超过阈值的对话由后台清扫移除。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::ChatError;
use crate::memory::{Conversation, ModelProfile};

pub type ConversationHandle = Arc<Mutex<Conversation>>;

/// 未带 chatID 的请求落到这个对话
pub const DEFAULT_CHAT_ID: &str = "default";

struct SessionEntry {
    conversation: ConversationHandle,
    last_active: Instant,
}

impl SessionEntry {
    fn new(conversation: Conversation) -> Self {
        Self {
            conversation: Arc::new(Mutex::new(conversation)),
            last_active: Instant::now(),
        }
    }

    fn touch(&mut self) -> ConversationHandle {
        self.last_active = Instant::now();
        self.conversation.clone()
    }

    /// 有请求持有句柄，或回合正锁着对话
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.conversation) > 1 || self.conversation.try_lock().is_err()
    }
}

pub struct ChatSessions {
    profile: ModelProfile,
    chats: RwLock<HashMap<String, SessionEntry>>,
}

impl ChatSessions {
    /// profile 决定新对话使用的模型与 system prompt
    pub fn new(profile: ModelProfile) -> Self {
        Self {
            profile,
            chats: RwLock::new(HashMap::new()),
        }
    }

    /// 取已有对话，不存在则以 system prompt 新建
    pub async fn get_or_create(&self, chat_id: &str) -> ConversationHandle {
        let mut chats = self.chats.write().await;
        chats
            .entry(chat_id.to_string())
            .or_insert_with(|| {
                info!(chat_id, "new conversation");
                SessionEntry::new(Conversation::new(chat_id, self.profile.clone()))
            })
            .touch()
    }

    pub async fn get(&self, chat_id: &str) -> Result<ConversationHandle, ChatError> {
        self.chats
            .write()
            .await
            .get_mut(chat_id)
            .map(SessionEntry::touch)
            .ok_or_else(|| ChatError::NotFound(chat_id.to_string()))
    }

    /// 移除空闲超过 idle 的对话，返回移除数量
    ///
    /// 正在使用的对话不会被移除，并视为刚刚活跃过。
    pub async fn cleanup_expired(&self, idle: Duration) -> usize {
        let mut chats = self.chats.write().await;
        let before = chats.len();
        chats.retain(|chat_id, entry| {
            if entry.in_use() {
                entry.last_active = Instant::now();
                return true;
            }
            let keep = entry.last_active.elapsed() < idle;
            if !keep {
                debug!(chat_id = %chat_id, "conversation expired");
            }
            keep
        });
        before - chats.len()
    }

    /// 后台清扫：每隔 every 清理一次，令牌取消时退出
    pub fn spawn_sweeper(self: &Arc<Self>, idle: Duration, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let sessions = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {
                        let expired = sessions.cleanup_expired(idle).await;
                        if expired > 0 {
                            let remaining = sessions.len().await;
                            info!(expired, remaining, "cleaned up idle conversations");
                        }
                    }
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chats.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sessions() -> ChatSessions {
        ChatSessions::new(ModelProfile {
            name: "m".to_string(),
            system_prompt: "sys".to_string(),
        })
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_handle() {
        let sessions = sessions();
        let a = sessions.get_or_create("trip-1").await;
        let b = sessions.get_or_create("trip-1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(sessions.len().await, 1);
        assert_eq!(a.lock().await.messages()[0].content, "sys");
    }

    #[tokio::test]
    async fn test_unknown_chat_is_not_found() {
        let sessions = sessions();
        assert!(matches!(sessions.get("nope").await, Err(ChatError::NotFound(_))));
        sessions.get_or_create(DEFAULT_CHAT_ID).await;
        assert!(sessions.get(DEFAULT_CHAT_ID).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_removes_idle_conversations() {
        let sessions = sessions();
        sessions.get_or_create("a").await;
        sessions.get_or_create("b").await;

        assert_eq!(sessions.cleanup_expired(Duration::from_secs(3600)).await, 0);
        assert_eq!(sessions.len().await, 2);

        assert_eq!(sessions.cleanup_expired(Duration::ZERO).await, 2);
        assert!(sessions.is_empty().await);
        assert!(matches!(sessions.get("a").await, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cleanup_skips_conversations_in_use() {
        let sessions = sessions();
        let held = sessions.get_or_create("held").await;
        let locked = sessions.get_or_create("locked").await.lock_owned().await;
        drop(sessions.get_or_create("idle").await);

        assert_eq!(sessions.cleanup_expired(Duration::ZERO).await, 1);
        assert!(sessions.get("held").await.is_ok());
        assert!(sessions.get("locked").await.is_ok());
        assert!(sessions.get("idle").await.is_err());

        drop(held);
        drop(locked);
        assert_eq!(sessions.cleanup_expired(Duration::ZERO).await, 2);
    }

    #[tokio::test]
    async fn test_sweeper_runs_until_cancelled() {
        let sessions = Arc::new(sessions());
        sessions.get_or_create("trip").await;

        let cancel = CancellationToken::new();
        let sweeper = sessions.spawn_sweeper(Duration::ZERO, Duration::from_millis(20), cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sessions.is_empty().await);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .expect("sweeper stops on cancel")
            .unwrap();
    }
}
