//! 推送投递渠道
//!
//! 定义投递渠道 trait 并提供 FCM 的具体实现。
//!
//! 渠道只负责把一条消息推到一个设备 token：不查目录、不写记录、
//! 不做内部重试——重试与否是分发层的决策。渠道的一切失败都以
//! [`DeliveryOutcome`] 的数据形式返回，从不作为 Err 向上传播。

mod fcm;

pub use fcm::FcmChannel;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::DeliveryOutcome;

/// 发往单个设备的推送消息
///
/// data 为扁平的字符串键值对——下游推送服务商的载荷格式不支持嵌套。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    /// 目标设备 token（由设备目录解析，非空）
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: Option<HashMap<String, String>>,
}

impl PushMessage {
    pub fn new(token: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            title: title.into(),
            body: body.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Option<HashMap<String, String>>) -> Self {
        self.data = data;
        self
    }
}

/// 推送渠道 trait
///
/// 实现应当是无状态的，便于并发调用。每次 `send` 恰好对应一次
/// 外部推送尝试。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// 推送一条消息到指定设备
    async fn send(&self, message: &PushMessage) -> DeliveryOutcome;

    /// 渠道名称（用于日志）
    fn name(&self) -> &str;
}
