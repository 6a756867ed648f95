//! FCM 推送渠道
//!
//! 通过 FCM HTTP 接口向用户设备发送推送。渠道在进程启动时用凭证
//! 一次性构造完成，构造后即可发送，不做首次调用时的惰性初始化。
//!
//! 服务商侧的一切失败（HTTP 错误、token 无效、超时）都映射为
//! `DeliveryOutcome::failed`，渠道本身从不返回 Err，也从不重试。

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use clinic_shared::config::FcmConfig;
use clinic_shared::error::{ClinicError, Result};

use super::{PushChannel, PushMessage};
use crate::types::{DeliveryOutcome, FailureReason};

/// FCM 推送渠道
pub struct FcmChannel {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

impl FcmChannel {
    /// 用配置中的凭证构造渠道
    ///
    /// 请求超时设置在 HTTP 客户端上，超时在 `send` 中被映射为
    /// TIMEOUT 失败原因。
    pub fn new(config: &FcmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClinicError::Internal(format!("构建 FCM HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            server_key: config.server_key.clone(),
        })
    }

    /// 构造 FCM 请求载荷
    ///
    /// data 若存在则作为扁平键值对附加——FCM 的 data 载荷不支持嵌套。
    fn build_payload(message: &PushMessage) -> Value {
        let mut payload = json!({
            "to": message.token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
        });

        if let Some(data) = &message.data {
            payload["data"] = json!(data);
        }

        payload
    }

    /// 把 FCM 响应映射为投递结果
    ///
    /// FCM 对合法请求返回 200，单条结果在 results[0] 中：
    /// message_id 表示接受，error 表示按 token 维度的拒绝
    /// （如 InvalidRegistration / NotRegistered）。
    fn outcome_from_response(status: StatusCode, body: &Value) -> DeliveryOutcome {
        if !status.is_success() {
            return DeliveryOutcome::failed(
                FailureReason::ProviderError,
                format!("FCM HTTP {status}"),
            );
        }

        let result = body.get("results").and_then(|r| r.get(0));

        if let Some(message_id) = result
            .and_then(|r| r.get("message_id"))
            .and_then(Value::as_str)
        {
            return DeliveryOutcome::delivered(message_id);
        }

        let error = result
            .and_then(|r| r.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("unrecognized FCM response");

        DeliveryOutcome::failed(FailureReason::ProviderError, error)
    }
}

#[async_trait]
impl PushChannel for FcmChannel {
    async fn send(&self, message: &PushMessage) -> DeliveryOutcome {
        if message.token.is_empty() {
            return DeliveryOutcome::failed(FailureReason::ProviderError, "empty device token");
        }

        debug!(title = %message.title, "FCM 推送发送中");

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("key={}", self.server_key))
            .json(&Self::build_payload(message))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "FCM 推送超时");
                return DeliveryOutcome::failed(FailureReason::Timeout, e.to_string());
            }
            Err(e) => {
                warn!(error = %e, "FCM 推送请求失败");
                return DeliveryOutcome::failed(FailureReason::ProviderError, e.to_string());
            }
        };

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "FCM 响应解析失败");
                return DeliveryOutcome::failed(
                    FailureReason::ProviderError,
                    format!("invalid FCM response: {e}"),
                );
            }
        };

        let outcome = Self::outcome_from_response(status, &body);
        if outcome.success {
            info!(
                message_id = outcome.message_id.as_deref().unwrap_or(""),
                "FCM 推送已接受"
            );
        } else {
            warn!(
                reason = ?outcome.failure_reason,
                detail = outcome.detail.as_deref().unwrap_or(""),
                "FCM 推送被拒绝"
            );
        }
        outcome
    }

    fn name(&self) -> &str {
        "fcm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_build_payload_without_data() {
        let message = PushMessage::new("tokABC", "Appt set", "See you at 10");
        let payload = FcmChannel::build_payload(&message);

        assert_eq!(payload["to"], "tokABC");
        assert_eq!(payload["notification"]["title"], "Appt set");
        assert_eq!(payload["notification"]["body"], "See you at 10");
        assert!(payload.get("data").is_none());
    }

    #[test]
    fn test_build_payload_with_flat_data() {
        let mut data = HashMap::new();
        data.insert("appointmentId".to_string(), "42".to_string());

        let message = PushMessage::new("tokABC", "t", "b").with_data(Some(data));
        let payload = FcmChannel::build_payload(&message);

        assert_eq!(payload["data"]["appointmentId"], "42");
    }

    #[test]
    fn test_outcome_from_accepted_response() {
        let body = serde_json::json!({
            "multicast_id": 1,
            "success": 1,
            "failure": 0,
            "results": [{ "message_id": "msg-1" }]
        });

        let outcome = FcmChannel::outcome_from_response(StatusCode::OK, &body);
        assert!(outcome.success);
        assert_eq!(outcome.message_id.as_deref(), Some("msg-1"));
    }

    #[test]
    fn test_outcome_from_token_rejection() {
        let body = serde_json::json!({
            "success": 0,
            "failure": 1,
            "results": [{ "error": "NotRegistered" }]
        });

        let outcome = FcmChannel::outcome_from_response(StatusCode::OK, &body);
        assert!(!outcome.success);
        assert_eq!(outcome.failure_reason, Some(FailureReason::ProviderError));
        assert_eq!(outcome.detail.as_deref(), Some("NotRegistered"));
    }

    #[test]
    fn test_outcome_from_http_error() {
        let outcome =
            FcmChannel::outcome_from_response(StatusCode::UNAUTHORIZED, &serde_json::json!({}));
        assert!(!outcome.success);
        assert_eq!(outcome.failure_reason, Some(FailureReason::ProviderError));
    }

    #[tokio::test]
    async fn test_send_rejects_empty_token() {
        let channel = FcmChannel::new(&FcmConfig::default()).unwrap();
        let message = PushMessage::new("", "t", "b");

        let outcome = channel.send(&message).await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure_reason, Some(FailureReason::ProviderError));
    }
}
