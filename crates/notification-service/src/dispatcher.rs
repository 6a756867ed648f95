//! 通知分发器
//!
//! 编排一次"通知用户 X"的完整流程：解析设备 token、调用推送渠道、
//! 构造通知记录并落库、返回统一结果。
//!
//! 核心正确性约束：无论推送成败，每次分发都恰好写入一条通知记录。
//! 推送侧失败被吸收为记录状态（FAILED）；只有记录写入失败才会
//! 作为错误返回，且返回前会尝试一次兜底的 FAILED 记录写入，
//! 保证"曾经尝试过推送"这件事尽量留下审计痕迹。

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use clinic_shared::config::DispatchConfig;
use clinic_shared::error::ClinicError;

use crate::channel::{PushChannel, PushMessage};
use crate::directory::DeviceDirectory;
use crate::error::DispatchError;
use crate::store::NotificationStore;
use crate::types::{
    DeliveryOutcome, DispatchOutcome, FailureReason, NewNotificationRecord, NotificationContent,
    NotificationStatus,
};

/// 通知分发器
pub struct Dispatcher {
    directory: Arc<dyn DeviceDirectory>,
    channel: Arc<dyn PushChannel>,
    store: Arc<dyn NotificationStore>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        channel: Arc<dyn PushChannel>,
        store: Arc<dyn NotificationStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            directory,
            channel,
            store,
            config,
        }
    }

    /// 分发一条通知到单个收件人
    ///
    /// 返回 Ok 时 outcome.success 表示推送是否送达，记录必定已落库；
    /// 返回 Err 仅发生在记录写入失败时（此时兜底写入已尝试过）。
    #[instrument(
        skip(self, content),
        fields(
            recipient = %recipient,
            notification_type = ?content.notification_type,
        )
    )]
    pub async fn dispatch(
        &self,
        recipient: &str,
        content: &NotificationContent,
    ) -> Result<DispatchOutcome, DispatchError> {
        let delivery = self.attempt_delivery(recipient, content).await;

        let status = if delivery.success {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };

        let record = NewNotificationRecord {
            title: content.title.clone(),
            body: content.body.clone(),
            recipient: recipient.to_string(),
            data: content.data.clone(),
            status,
            notification_type: content.notification_type,
        };

        let stored = match timeout(self.config.store_timeout(), self.store.create(&record)).await {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => return self.fallback_write(recipient, content, e).await,
            Err(_) => {
                let e = ClinicError::ExternalServiceTimeout {
                    service: "notification-store".to_string(),
                };
                return self.fallback_write(recipient, content, e).await;
            }
        };

        if delivery.success {
            info!(
                record_id = stored.id,
                message_id = delivery.message_id.as_deref().unwrap_or(""),
                "通知分发完成"
            );
        } else {
            warn!(
                record_id = stored.id,
                reason = ?delivery.failure_reason,
                detail = delivery.detail.as_deref().unwrap_or(""),
                "推送未送达，已记录 FAILED"
            );
        }

        Ok(DispatchOutcome {
            success: delivery.success,
            record: stored,
            message_id: delivery.message_id,
        })
    }

    /// 解析 token 并尝试推送
    ///
    /// 没有 token 时不调用渠道，直接产出 NO_TOKEN 失败；
    /// 目录查询出错同样被吸收为失败结果——推送侧的任何问题
    /// 都不能阻断后续的记录写入。
    async fn attempt_delivery(
        &self,
        recipient: &str,
        content: &NotificationContent,
    ) -> DeliveryOutcome {
        let token = match self.directory.get_token(recipient).await {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                warn!("收件人没有注册设备 token，跳过推送");
                return DeliveryOutcome::failed(
                    FailureReason::NoToken,
                    "no registered device token",
                );
            }
            Err(e) => {
                warn!(error = %e, "设备 token 查询失败");
                return DeliveryOutcome::failed(
                    FailureReason::ProviderError,
                    format!("device token lookup failed: {e}"),
                );
            }
        };

        let message = PushMessage::new(token, content.title.clone(), content.body.clone())
            .with_data(content.data.clone());

        match timeout(self.config.push_timeout(), self.channel.send(&message)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(channel = self.channel.name(), "推送超出时限");
                DeliveryOutcome::failed(FailureReason::Timeout, "push attempt exceeded deadline")
            }
        }
    }

    /// 记录主写入失败后的兜底写入
    ///
    /// 推送可能已经发出且无法撤回，所以尽力写入一条精简的 FAILED
    /// 记录保住审计痕迹。无论兜底写入成败，向调用方报告的都是
    /// 最初的存储错误；兜底失败只记日志。
    async fn fallback_write(
        &self,
        recipient: &str,
        content: &NotificationContent,
        original: ClinicError,
    ) -> Result<DispatchOutcome, DispatchError> {
        error!(error = %original, "通知记录主写入失败，尝试兜底写入");

        let fallback = NewNotificationRecord {
            title: content.title.clone(),
            body: content.body.clone(),
            recipient: recipient.to_string(),
            data: None,
            status: NotificationStatus::Failed,
            notification_type: content.notification_type,
        };

        match timeout(self.config.store_timeout(), self.store.create(&fallback)).await {
            Ok(Ok(record)) => {
                warn!(record_id = record.id, "兜底 FAILED 记录已写入");
            }
            Ok(Err(e)) => {
                error!(error = %e, "兜底写入也失败，通知尝试未留下记录");
            }
            Err(_) => {
                error!("兜底写入超时，通知尝试未留下记录");
            }
        }

        Err(DispatchError::StoreWriteFailed(original))
    }
}
