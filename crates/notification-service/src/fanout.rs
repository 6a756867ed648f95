//! 批量通知协调器
//!
//! 把同一条通知内容分发给一组收件人：并发受上限约束，
//! 结果顺序与输入顺序一致，单个收件人的失败不影响其他人。

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tracing::{info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::types::{FanoutEntry, FanoutSummary, NotificationContent};

/// 批量通知协调器
pub struct FanoutCoordinator {
    dispatcher: Arc<Dispatcher>,
    max_in_flight: usize,
}

impl FanoutCoordinator {
    /// max_in_flight 为 0 时按 1 处理，避免 buffered(0) 永不推进
    pub fn new(dispatcher: Arc<Dispatcher>, max_in_flight: usize) -> Self {
        Self {
            dispatcher,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// 向一组收件人分发同一条通知
    ///
    /// 收件人按首次出现去重；每个收件人恰好被分发一次。
    /// 任何时刻在途的分发不超过 max_in_flight，汇总条目
    /// 与去重后的输入顺序一一对应。
    #[instrument(skip(self, content), fields(recipients = recipients.len()))]
    pub async fn dispatch_many(
        &self,
        recipients: &[String],
        content: &NotificationContent,
    ) -> Result<FanoutSummary, DispatchError> {
        if recipients.is_empty() {
            return Err(DispatchError::EmptyRecipients);
        }

        let mut seen = HashSet::new();
        let unique: Vec<String> = recipients
            .iter()
            .filter(|r| seen.insert(r.as_str()))
            .cloned()
            .collect();

        if unique.len() < recipients.len() {
            warn!(
                duplicates = recipients.len() - unique.len(),
                "收件人列表包含重复项，已按首次出现去重"
            );
        }

        let entries: Vec<FanoutEntry> = stream::iter(unique)
            .map(|recipient| {
                let dispatcher = Arc::clone(&self.dispatcher);
                let content = content.clone();
                async move {
                    match dispatcher.dispatch(&recipient, &content).await {
                        Ok(outcome) => FanoutEntry {
                            recipient,
                            outcome: Some(outcome),
                            error: None,
                        },
                        Err(e) => FanoutEntry {
                            recipient,
                            outcome: None,
                            error: Some(e.to_string()),
                        },
                    }
                }
            })
            .buffered(self.max_in_flight)
            .collect()
            .await;

        let succeeded = entries.iter().filter(|e| e.succeeded()).count();
        info!(
            attempted = entries.len(),
            succeeded, "批量通知分发完成"
        );

        Ok(FanoutSummary {
            attempted: entries.len(),
            succeeded,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use clinic_shared::config::DispatchConfig;

    use crate::channel::PushChannel;
    use crate::memory::{MemoryDeviceDirectory, MemoryNotificationStore, MemoryPushChannel};
    use crate::store::NotificationStore;
    use crate::types::{FailureReason, NotificationStatus, NotificationType};

    struct Harness {
        channel: Arc<MemoryPushChannel>,
        store: Arc<MemoryNotificationStore>,
        coordinator: FanoutCoordinator,
    }

    fn harness(directory: MemoryDeviceDirectory, max_in_flight: usize) -> Harness {
        let channel = Arc::new(MemoryPushChannel::new());
        let store = Arc::new(MemoryNotificationStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(directory),
            Arc::clone(&channel) as Arc<dyn PushChannel>,
            Arc::clone(&store) as Arc<dyn NotificationStore>,
            DispatchConfig {
                push_timeout_ms: 200,
                store_timeout_ms: 200,
                max_in_flight,
            },
        ));
        Harness {
            channel,
            store,
            coordinator: FanoutCoordinator::new(dispatcher, max_in_flight),
        }
    }

    fn content() -> NotificationContent {
        NotificationContent::new(NotificationType::System, "Maintenance", "Back at noon")
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_recipient_list_is_rejected() {
        let h = harness(MemoryDeviceDirectory::new(), 4);
        let result = h.coordinator.dispatch_many(&[], &content()).await;
        assert!(matches!(result, Err(DispatchError::EmptyRecipients)));
    }

    #[tokio::test]
    async fn test_per_recipient_failure_is_isolated() {
        // u2 没有注册 token，u1 / u3 正常
        let directory = MemoryDeviceDirectory::new()
            .with_token("u1", "tok-1")
            .with_token("u3", "tok-3");
        let h = harness(directory, 4);

        let summary = h
            .coordinator
            .dispatch_many(&ids(&["u1", "u2", "u3"]), &content())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);

        assert!(summary.entries[0].succeeded());
        assert!(!summary.entries[1].succeeded());
        assert!(summary.entries[2].succeeded());

        // 失败的收件人同样留下了 FAILED 记录
        let u2_records = h.store.list_for_recipient("u2").await.unwrap();
        assert_eq!(u2_records.len(), 1);
        assert_eq!(u2_records[0].status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn test_entries_follow_input_order_despite_uneven_latency() {
        let directory = MemoryDeviceDirectory::new()
            .with_token("u1", "tok-1")
            .with_token("u2", "tok-2")
            .with_token("u3", "tok-3");
        let h = harness(directory, 3);
        // 第一个收件人最慢，结果顺序仍须跟随输入
        h.channel.delay_token("tok-1", Duration::from_millis(80));

        let summary = h
            .coordinator
            .dispatch_many(&ids(&["u1", "u2", "u3"]), &content())
            .await
            .unwrap();

        let order: Vec<&str> = summary
            .entries
            .iter()
            .map(|e| e.recipient.as_str())
            .collect();
        assert_eq!(order, vec!["u1", "u2", "u3"]);
        assert_eq!(summary.succeeded, 3);
    }

    #[tokio::test]
    async fn test_slow_recipient_times_out_others_unaffected() {
        let directory = MemoryDeviceDirectory::new()
            .with_token("u1", "tok-1")
            .with_token("u2", "tok-2")
            .with_token("u3", "tok-3");
        let h = harness(directory, 4);
        // u2 的推送超出 push_timeout
        h.channel.delay_token("tok-2", Duration::from_secs(2));

        let summary = h
            .coordinator
            .dispatch_many(&ids(&["u1", "u2", "u3"]), &content())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert!(!summary.entries[1].succeeded());

        let u2_records = h.store.list_for_recipient("u2").await.unwrap();
        assert_eq!(u2_records.len(), 1);
        assert_eq!(u2_records[0].status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn test_duplicate_recipients_dispatched_once() {
        let directory = MemoryDeviceDirectory::new()
            .with_token("u1", "tok-1")
            .with_token("u2", "tok-2");
        let h = harness(directory, 4);

        let summary = h
            .coordinator
            .dispatch_many(&ids(&["u1", "u2", "u1", "u1"]), &content())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(h.channel.sent().len(), 2);
        assert_eq!(h.store.list_for_recipient("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_rejection_counts_as_failure() {
        let directory = MemoryDeviceDirectory::new()
            .with_token("u1", "tok-1")
            .with_token("u2", "tok-2");
        let h = harness(directory, 2);
        h.channel.fail_token("tok-2", FailureReason::ProviderError);

        let summary = h
            .coordinator
            .dispatch_many(&ids(&["u1", "u2"]), &content())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert!(summary.entries[0].succeeded());
        assert!(!summary.entries[1].succeeded());
    }
}
