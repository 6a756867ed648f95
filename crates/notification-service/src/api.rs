//! 通知服务 REST API
//!
//! 对外暴露设备 token 维护、单发/批量通知和通知记录查询接口。
//! 响应体统一为 `{success, code, message, data}` 结构。

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use clinic_shared::database::Database;
use clinic_shared::error::ClinicError;

use crate::directory::DeviceDirectory;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::fanout::FanoutCoordinator;
use crate::store::NotificationStore;
use crate::types::{
    DispatchOutcome, FanoutSummary, NotificationContent, NotificationRecord, NotificationType,
};

// ---------------------------------------------------------------------------
// 应用状态
// ---------------------------------------------------------------------------

/// API 层共享状态
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub fanout: Arc<FanoutCoordinator>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub store: Arc<dyn NotificationStore>,
    /// 内存后端运行时（测试、本地）为 None，健康检查跳过数据库探测
    pub db: Option<Database>,
}

// ---------------------------------------------------------------------------
// DTO 定义
// ---------------------------------------------------------------------------

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 更新设备 token 请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTokenRequest {
    pub user_id: String,
    pub token: String,
}

/// 单发通知请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub notification_type: Option<NotificationType>,
    pub data: Option<std::collections::HashMap<String, String>>,
}

/// 批量通知请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBulkRequest {
    pub user_ids: Vec<String>,
    pub title: String,
    pub body: String,
    pub notification_type: Option<NotificationType>,
    pub data: Option<std::collections::HashMap<String, String>>,
}

// ---------------------------------------------------------------------------
// 错误映射
// ---------------------------------------------------------------------------

/// API 层错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<ClinicError> for ApiError {
    fn from(e: ClinicError) -> Self {
        Self::Dispatch(DispatchError::Shared(e))
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Dispatch(DispatchError::EmptyRecipients) => StatusCode::BAD_REQUEST,
            Self::Dispatch(DispatchError::StoreWriteFailed(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Dispatch(DispatchError::Shared(e)) => match e {
                ClinicError::NotFound { .. } => StatusCode::NOT_FOUND,
                ClinicError::Validation(_) | ClinicError::InvalidArgument { .. } => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Dispatch(DispatchError::EmptyRecipients) => "EMPTY_RECIPIENTS",
            Self::Dispatch(DispatchError::StoreWriteFailed(_)) => "STORE_WRITE_FAILED",
            Self::Dispatch(DispatchError::Shared(e)) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "通知接口内部错误");
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// 处理器
// ---------------------------------------------------------------------------

/// 健康检查（含数据库探测）
async fn health(State(state): State<AppState>) -> Response {
    let database = match &state.db {
        Some(db) => match db.health_check().await {
            Ok(()) => "up",
            Err(e) => {
                tracing::error!(error = %e, "数据库健康检查失败");
                let body = json!({
                    "status": "unhealthy",
                    "service": "notification-service",
                    "database": "down"
                });
                return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
            }
        },
        None => "skipped",
    };

    Json(json!({
        "status": "healthy",
        "service": "notification-service",
        "database": database
    }))
    .into_response()
}

/// 更新用户设备 token
async fn update_token(
    State(state): State<AppState>,
    Json(req): Json<UpdateTokenRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if req.user_id.is_empty() {
        return Err(ApiError::Validation("userId 不能为空".to_string()));
    }
    if req.token.is_empty() {
        return Err(ApiError::Validation("token 不能为空".to_string()));
    }

    state.directory.set_token(&req.user_id, &req.token).await?;
    info!(user_id = %req.user_id, "设备 token 已更新");

    Ok(Json(ApiResponse::success(json!({ "updated": true }))))
}

/// 向单个用户发送通知
///
/// 推送失败不是接口错误：响应中的 success 反映推送结果，
/// 记录总会写入。只有记录写入失败才返回 500。
async fn send_notification(
    State(state): State<AppState>,
    Json(req): Json<SendNotificationRequest>,
) -> Result<Json<ApiResponse<DispatchOutcome>>, ApiError> {
    if req.user_id.is_empty() {
        return Err(ApiError::Validation("userId 不能为空".to_string()));
    }
    if req.title.is_empty() {
        return Err(ApiError::Validation("title 不能为空".to_string()));
    }
    if req.body.is_empty() {
        return Err(ApiError::Validation("body 不能为空".to_string()));
    }

    let mut content = NotificationContent::new(
        req.notification_type.unwrap_or(NotificationType::Other),
        req.title,
        req.body,
    );
    if let Some(data) = req.data {
        content = content.with_data_map(data);
    }

    // 分发在独立任务中执行：客户端中途断开不会在推送与落库之间中止它
    let dispatcher = Arc::clone(&state.dispatcher);
    let user_id = req.user_id;
    let outcome = tokio::spawn(async move { dispatcher.dispatch(&user_id, &content).await })
        .await
        .map_err(|e| {
            ApiError::Dispatch(DispatchError::Shared(ClinicError::Internal(format!(
                "分发任务异常终止: {e}"
            ))))
        })??;
    let message = if outcome.success {
        "Notification sent"
    } else {
        "Notification recorded but push failed"
    };

    Ok(Json(ApiResponse::with_message(outcome, message)))
}

/// 向一组用户批量发送通知
async fn send_bulk(
    State(state): State<AppState>,
    Json(req): Json<SendBulkRequest>,
) -> Result<Json<ApiResponse<FanoutSummary>>, ApiError> {
    if req.title.is_empty() {
        return Err(ApiError::Validation("title 不能为空".to_string()));
    }
    if req.body.is_empty() {
        return Err(ApiError::Validation("body 不能为空".to_string()));
    }

    let mut content = NotificationContent::new(
        req.notification_type.unwrap_or(NotificationType::Other),
        req.title,
        req.body,
    );
    if let Some(data) = req.data {
        content = content.with_data_map(data);
    }

    // 与单发一致：扇出放入独立任务，客户端断开不会中止在途分发
    let fanout = Arc::clone(&state.fanout);
    let user_ids = req.user_ids;
    let summary = tokio::spawn(async move { fanout.dispatch_many(&user_ids, &content).await })
        .await
        .map_err(|e| {
            ApiError::Dispatch(DispatchError::Shared(ClinicError::Internal(format!(
                "分发任务异常终止: {e}"
            ))))
        })??;
    let message = format!(
        "Notifications sent to {}/{} users",
        summary.succeeded, summary.attempted
    );

    Ok(Json(ApiResponse::with_message(summary, message)))
}

/// 查询某用户的通知记录（按创建时间倒序）
async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<NotificationRecord>>>, ApiError> {
    let records = state.store.list_for_recipient(&user_id).await?;
    Ok(Json(ApiResponse::success(records)))
}

/// 构建通知服务路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/notifications/token", put(update_token))
        .route("/notifications/send", post(send_notification))
        .route("/notifications/send-bulk", post(send_bulk))
        .route("/notifications/{user_id}", get(list_notifications))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;

    use clinic_shared::config::DispatchConfig;

    use crate::memory::{MemoryDeviceDirectory, MemoryNotificationStore, MemoryPushChannel};

    fn test_app(
        directory: MemoryDeviceDirectory,
    ) -> (Router, Arc<MemoryNotificationStore>, Arc<MemoryPushChannel>) {
        let directory: Arc<dyn DeviceDirectory> = Arc::new(directory);
        let channel = Arc::new(MemoryPushChannel::new());
        let store = Arc::new(MemoryNotificationStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&directory),
            Arc::clone(&channel) as Arc<dyn crate::channel::PushChannel>,
            Arc::clone(&store) as Arc<dyn NotificationStore>,
            DispatchConfig::default(),
        ));
        let fanout = Arc::new(FanoutCoordinator::new(Arc::clone(&dispatcher), 4));

        let state = AppState {
            dispatcher,
            fanout,
            directory,
            store: Arc::clone(&store) as Arc<dyn NotificationStore>,
            db: None,
        };
        (router(state), store, channel)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _) = test_app(MemoryDeviceDirectory::new());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_update_token_then_send() {
        let (app, store, _) = test_app(MemoryDeviceDirectory::new());

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/notifications/token",
                json!({ "userId": "u1", "token": "tok-1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(json_request(
                "POST",
                "/notifications/send",
                json!({
                    "userId": "u1",
                    "title": "Hello",
                    "body": "World",
                    "notificationType": "SYSTEM"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["success"], true);
        assert_eq!(body["data"]["record"]["status"], "SENT");

        assert_eq!(store.list_for_recipient("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_without_token_reports_failed_push() {
        let (app, store, _) = test_app(MemoryDeviceDirectory::new());

        let response = app
            .oneshot(json_request(
                "POST",
                "/notifications/send",
                json!({ "userId": "u9", "title": "t", "body": "b" }),
            ))
            .await
            .unwrap();

        // 推送失败不是接口错误
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["success"], false);
        assert_eq!(body["data"]["record"]["status"], "FAILED");
        assert_eq!(store.list_for_recipient("u9").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_token_validation() {
        let (app, _, _) = test_app(MemoryDeviceDirectory::new());

        let response = app
            .oneshot(json_request(
                "PUT",
                "/notifications/token",
                json!({ "userId": "", "token": "tok" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_send_bulk_summary() {
        let directory = MemoryDeviceDirectory::new()
            .with_token("u1", "tok-1")
            .with_token("u3", "tok-3");
        let (app, _, _) = test_app(directory);

        let response = app
            .oneshot(json_request(
                "POST",
                "/notifications/send-bulk",
                json!({
                    "userIds": ["u1", "u2", "u3"],
                    "title": "Maintenance",
                    "body": "Back at noon",
                    "notificationType": "SYSTEM"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Notifications sent to 2/3 users");
        assert_eq!(body["data"]["attempted"], 3);
        assert_eq!(body["data"]["succeeded"], 2);
        assert_eq!(body["data"]["entries"][1]["outcome"]["success"], false);
    }

    #[tokio::test]
    async fn test_send_bulk_empty_list_rejected() {
        let (app, _, _) = test_app(MemoryDeviceDirectory::new());

        let response = app
            .oneshot(json_request(
                "POST",
                "/notifications/send-bulk",
                json!({ "userIds": [], "title": "t", "body": "b" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "EMPTY_RECIPIENTS");
    }

    #[tokio::test]
    async fn test_list_notifications_newest_first() {
        let directory = MemoryDeviceDirectory::new().with_token("u1", "tok-1");
        let (app, _, _) = test_app(directory);

        for i in 0..2 {
            let response = app
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/notifications/send",
                    json!({ "userId": "u1", "title": format!("t{i}"), "body": "b" }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(Request::get("/notifications/u1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let records = body["data"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        let first_id = records[0]["id"].as_i64().unwrap();
        let second_id = records[1]["id"].as_i64().unwrap();
        assert!(first_id > second_id);
    }

    #[tokio::test]
    async fn test_send_rejects_empty_title_and_body() {
        let (app, store, _) = test_app(MemoryDeviceDirectory::new());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/notifications/send",
                json!({ "userId": "u1", "title": "", "body": "b" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let response = app
            .oneshot(json_request(
                "POST",
                "/notifications/send-bulk",
                json!({ "userIds": ["u1"], "title": "t", "body": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");

        // 被拒绝的请求不应产生任何记录
        assert!(store.list_for_recipient("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_client_disconnect_does_not_abort_dispatch() {
        let directory = MemoryDeviceDirectory::new().with_token("u1", "tok-1");
        let (app, store, channel) = test_app(directory);
        channel.delay_token("tok-1", Duration::from_millis(100));

        // 模拟客户端提前断开：丢弃尚未完成的响应 future
        let fut = app.oneshot(json_request(
            "POST",
            "/notifications/send",
            json!({ "userId": "u1", "title": "t", "body": "b" }),
        ));
        assert!(
            tokio::time::timeout(Duration::from_millis(10), fut)
                .await
                .is_err()
        );

        // 分发仍须完成：推送发出且记录落库
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(channel.sent().len(), 1);
        let records = store.list_for_recipient("u1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, crate::types::NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn test_client_disconnect_does_not_abort_bulk_dispatch() {
        let directory = MemoryDeviceDirectory::new()
            .with_token("u1", "tok-1")
            .with_token("u2", "tok-2");
        let (app, store, channel) = test_app(directory);
        channel.delay_token("tok-2", Duration::from_millis(100));

        let fut = app.oneshot(json_request(
            "POST",
            "/notifications/send-bulk",
            json!({ "userIds": ["u1", "u2"], "title": "t", "body": "b" }),
        ));
        assert!(
            tokio::time::timeout(Duration::from_millis(10), fut)
                .await
                .is_err()
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.list_for_recipient("u1").await.unwrap().len(), 1);
        assert_eq!(store.list_for_recipient("u2").await.unwrap().len(), 1);
    }
}
