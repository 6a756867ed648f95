//! 内存实现
//!
//! 设备目录、记录存储和推送渠道的内存版本，用于本地开发
//! （未配置 FCM 凭证时的模拟渠道）和集成测试。
//! 行为与各自的 PostgreSQL / FCM 实现保持一致的契约。

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use clinic_shared::error::Result;

use crate::channel::{PushChannel, PushMessage};
use crate::directory::DeviceDirectory;
use crate::store::NotificationStore;
use crate::types::{
    DeliveryOutcome, FailureReason, NewNotificationRecord, NotificationRecord,
};

// ---------------------------------------------------------------------------
// MemoryDeviceDirectory
// ---------------------------------------------------------------------------

/// 内存设备目录
#[derive(Default)]
pub struct MemoryDeviceDirectory {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一个用户的 token（测试辅助）
    pub fn with_token(self, user_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens
            .lock()
            .expect("directory lock poisoned")
            .insert(user_id.into(), token.into());
        self
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDeviceDirectory {
    async fn get_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .tokens
            .lock()
            .expect("directory lock poisoned")
            .get(user_id)
            .cloned())
    }

    async fn set_token(&self, user_id: &str, token: &str) -> Result<()> {
        self.tokens
            .lock()
            .expect("directory lock poisoned")
            .insert(user_id.to_string(), token.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryNotificationStore
// ---------------------------------------------------------------------------

/// 内存通知记录存储
#[derive(Default)]
pub struct MemoryNotificationStore {
    records: Mutex<Vec<NotificationRecord>>,
    next_id: AtomicI64,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// 当前全部记录的快照（测试辅助）
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().expect("store lock poisoned").clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, record: &NewNotificationRecord) -> Result<NotificationRecord> {
        let created = NotificationRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            title: record.title.clone(),
            body: record.body.clone(),
            recipient: record.recipient.clone(),
            data: record.data.clone(),
            status: record.status,
            notification_type: record.notification_type,
            created_at: Utc::now(),
        };

        self.records
            .lock()
            .expect("store lock poisoned")
            .push(created.clone());
        Ok(created)
    }

    async fn list_for_recipient(&self, user_id: &str) -> Result<Vec<NotificationRecord>> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .expect("store lock poisoned")
            .iter()
            .filter(|r| r.recipient == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// MemoryPushChannel
// ---------------------------------------------------------------------------

/// 模拟推送渠道
///
/// 默认对所有消息返回成功并生成模拟 message id；可按 token
/// 预置失败原因或投递延迟，用于验证部分失败与超时路径。
/// 未配置 FCM 凭证时也作为本地开发渠道使用（仅记录日志）。
#[derive(Default)]
pub struct MemoryPushChannel {
    sent: Mutex<Vec<PushMessage>>,
    failures: Mutex<HashMap<String, FailureReason>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl MemoryPushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置某个 token 的推送失败
    pub fn fail_token(&self, token: impl Into<String>, reason: FailureReason) {
        self.failures
            .lock()
            .expect("channel lock poisoned")
            .insert(token.into(), reason);
    }

    /// 预置某个 token 的投递延迟
    pub fn delay_token(&self, token: impl Into<String>, delay: Duration) {
        self.delays
            .lock()
            .expect("channel lock poisoned")
            .insert(token.into(), delay);
    }

    /// 已发送消息的快照（测试辅助）
    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().expect("channel lock poisoned").clone()
    }
}

#[async_trait]
impl PushChannel for MemoryPushChannel {
    async fn send(&self, message: &PushMessage) -> DeliveryOutcome {
        let delay = self
            .delays
            .lock()
            .expect("channel lock poisoned")
            .get(&message.token)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.sent
            .lock()
            .expect("channel lock poisoned")
            .push(message.clone());

        let forced_failure = self
            .failures
            .lock()
            .expect("channel lock poisoned")
            .get(&message.token)
            .copied();
        if let Some(reason) = forced_failure {
            return DeliveryOutcome::failed(reason, "simulated failure");
        }

        let message_id = format!("sim-{}", Uuid::new_v4());
        info!(
            token = %message.token,
            message_id = %message_id,
            title = %message.title,
            "模拟推送已发送"
        );
        DeliveryOutcome::delivered(message_id)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NotificationStatus, NotificationType};

    #[tokio::test]
    async fn test_directory_replace_keeps_latest() {
        let directory = MemoryDeviceDirectory::new();
        directory.set_token("u1", "tok-a").await.unwrap();
        directory.set_token("u1", "tok-b").await.unwrap();

        assert_eq!(
            directory.get_token("u1").await.unwrap(),
            Some("tok-b".to_string())
        );
        assert_eq!(directory.get_token("u2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_assigns_increasing_ids() {
        let store = MemoryNotificationStore::new();
        let record = NewNotificationRecord {
            title: "t".to_string(),
            body: "b".to_string(),
            recipient: "u1".to_string(),
            data: None,
            status: NotificationStatus::Sent,
            notification_type: NotificationType::System,
        };

        let first = store.create(&record).await.unwrap();
        let second = store.create(&record).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn test_channel_forced_failure() {
        let channel = MemoryPushChannel::new();
        channel.fail_token("tok-bad", FailureReason::ProviderError);

        let ok = channel.send(&PushMessage::new("tok-good", "t", "b")).await;
        assert!(ok.success);

        let failed = channel.send(&PushMessage::new("tok-bad", "t", "b")).await;
        assert!(!failed.success);
        assert_eq!(failed.failure_reason, Some(FailureReason::ProviderError));

        assert_eq!(channel.sent().len(), 2);
    }
}
