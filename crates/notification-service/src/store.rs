//! 通知记录存储
//!
//! 以追加为主的持久化存储：每次分发尝试写入一条记录，
//! 本服务创建后不删除、不修改。记录是"通知曾被尝试过"的
//! 持久事实来源，与推送本身是否送达无关。

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use clinic_shared::error::{ClinicError, Result};

use crate::types::{NewNotificationRecord, NotificationRecord, NotificationStatus, NotificationType};

/// 通知记录存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// 写入一条通知记录，由存储分配 id 和创建时间
    async fn create(&self, record: &NewNotificationRecord) -> Result<NotificationRecord>;

    /// 查询某收件人的通知记录，按创建时间倒序
    async fn list_for_recipient(&self, user_id: &str) -> Result<Vec<NotificationRecord>>;
}

/// PostgreSQL 通知记录存储
///
/// data 以 JSONB 原样落库，供后续排查时检视。
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 把数据库行映射为通知记录
    ///
    /// status / notification_type 以 TEXT 存储，遇到未知值说明
    /// 数据被外部写坏，按内部错误上报而不是悄悄丢弃。
    fn record_from_row(row: &PgRow) -> Result<NotificationRecord> {
        let status: String = row.try_get("status")?;
        let status = NotificationStatus::parse(&status)
            .ok_or_else(|| ClinicError::Internal(format!("未知通知状态: {status}")))?;

        let notification_type: String = row.try_get("notification_type")?;
        let notification_type = NotificationType::parse(&notification_type)
            .ok_or_else(|| ClinicError::Internal(format!("未知通知类型: {notification_type}")))?;

        let data: Option<serde_json::Value> = row.try_get("data")?;
        let data = match data {
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|e| ClinicError::Internal(format!("通知 data 字段损坏: {e}")))?,
            ),
            None => None,
        };

        Ok(NotificationRecord {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            recipient: row.try_get("recipient")?,
            data,
            status,
            notification_type,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, record: &NewNotificationRecord) -> Result<NotificationRecord> {
        let data = match record.data.as_ref() {
            Some(d) => Some(
                serde_json::to_value(d)
                    .map_err(|e| ClinicError::Internal(format!("通知 data 序列化失败: {e}")))?,
            ),
            None => None,
        };

        let row = sqlx::query(
            r#"
            INSERT INTO notifications (title, body, recipient, data, status, notification_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, title, body, recipient, data, status, notification_type, created_at
            "#,
        )
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.recipient)
        .bind(data)
        .bind(record.status.as_str())
        .bind(record.notification_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Self::record_from_row(&row)
    }

    async fn list_for_recipient(&self, user_id: &str) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, body, recipient, data, status, notification_type, created_at
            FROM notifications
            WHERE recipient = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }
}
