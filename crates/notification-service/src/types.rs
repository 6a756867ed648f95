//! 通知类型定义
//!
//! 定义通知记录、投递结果和批量分发汇总等数据结构。
//! 序列化统一使用 camelCase 字段名和 SCREAMING_SNAKE_CASE 枚举值，
//! 与既有客户端的线上格式保持一致。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// NotificationStatus — 通知记录状态
// ---------------------------------------------------------------------------

/// 通知记录状态
///
/// 分发核心只会在创建时写入 Sent / Failed；
/// Delivered / Read 由外部的回执逻辑写入，本服务读取时原样保留，
/// 永不覆盖。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Sent,
    Failed,
    Delivered,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            "DELIVERED" => Some(Self::Delivered),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NotificationType — 通知分类
// ---------------------------------------------------------------------------

/// 通知分类
///
/// 仅用于归类展示，分发核心不依据类型做任何行为分支。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Appointment,
    Message,
    System,
    Other,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appointment => "APPOINTMENT",
            Self::Message => "MESSAGE",
            Self::System => "SYSTEM",
            Self::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPOINTMENT" => Some(Self::Appointment),
            "MESSAGE" => Some(Self::Message),
            "SYSTEM" => Some(Self::System),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DeliveryOutcome — 单次推送结果
// ---------------------------------------------------------------------------

/// 推送失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// 收件人没有注册设备 token，推送被跳过
    NoToken,
    /// 推送已尝试，服务商拒绝或出错
    ProviderError,
    /// 推送调用超出时限
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoToken => "NO_TOKEN",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

/// 单次推送结果
///
/// 由投递渠道产出、分发器立即消费。渠道的一切失败都以数据形式
/// 返回（success=false + 原因），从不抛错——推送失败绝不能
/// 阻断通知记录的写入。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub success: bool,
    /// 服务商返回的消息标识，用于追踪投递状态
    pub message_id: Option<String>,
    pub failure_reason: Option<FailureReason>,
    /// 失败详情，仅用于日志与排查
    pub detail: Option<String>,
}

impl DeliveryOutcome {
    /// 创建成功结果
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            failure_reason: None,
            detail: None,
        }
    }

    /// 创建失败结果
    pub fn failed(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            failure_reason: Some(reason),
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationContent — 待分发的通知内容
// ---------------------------------------------------------------------------

/// 待分发的通知内容
///
/// 不含收件人，同一份内容既可单发也可批量扇出。
/// data 为扁平的字符串键值对，原样透传给推送渠道并随记录落库。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub notification_type: NotificationType,
    pub data: Option<HashMap<String, String>>,
}

impl NotificationContent {
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            notification_type,
            data: None,
        }
    }

    /// 添加业务数据
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// 批量添加业务数据
    pub fn with_data_map(mut self, data: HashMap<String, String>) -> Self {
        self.data.get_or_insert_with(HashMap::new).extend(data);
        self
    }
}

// ---------------------------------------------------------------------------
// NotificationRecord — 持久化通知记录
// ---------------------------------------------------------------------------

/// 待写入的通知记录（id 与创建时间由记录存储分配）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotificationRecord {
    pub title: String,
    pub body: String,
    pub recipient: String,
    pub data: Option<HashMap<String, String>>,
    pub status: NotificationStatus,
    pub notification_type: NotificationType,
}

/// 持久化通知记录
///
/// 每次分发尝试的持久事实：无论推送本身成功与否都恰好写入一条。
/// 本服务创建后不再修改，已读回执由外部逻辑更新 status。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub recipient: String,
    pub data: Option<HashMap<String, String>>,
    pub status: NotificationStatus,
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DispatchOutcome / FanoutSummary — 分发结果
// ---------------------------------------------------------------------------

/// 单次分发的完整结果
///
/// success 表示推送是否送达；record 是已落库的通知记录。
/// 推送失败时 success=false 但记录仍然存在（status=FAILED）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub success: bool,
    pub record: NotificationRecord,
    pub message_id: Option<String>,
}

/// 批量分发中单个收件人的结果
///
/// outcome 为 None 表示该收件人的分发本身失败了
/// （即记录写入失败），error 携带原因。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutEntry {
    pub recipient: String,
    pub outcome: Option<DispatchOutcome>,
    pub error: Option<String>,
}

impl FanoutEntry {
    /// 该收件人的推送是否送达
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.success)
    }
}

/// 批量分发汇总
///
/// entries 的顺序与去重后的输入顺序一致，与各分发的完成先后无关。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutSummary {
    pub attempted: usize,
    /// 推送送达的收件人数
    pub succeeded: usize,
    pub entries: Vec<FanoutEntry>,
}
