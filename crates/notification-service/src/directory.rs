//! 设备目录适配器
//!
//! 用户 ID 到当前设备 token 的映射：每个用户零或一个 token，
//! 支持查询和整体替换。分发核心从不跨调用缓存 token——
//! token 可能在两次通知之间被轮换，缓存会导致误投或浪费推送。

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use clinic_shared::error::Result;

/// 设备目录接口
///
/// 由外部用户体系提供，核心只依赖这两个操作。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// 查询用户当前的设备 token
    async fn get_token(&self, user_id: &str) -> Result<Option<String>>;

    /// 替换用户的设备 token
    async fn set_token(&self, user_id: &str, token: &str) -> Result<()>;
}

/// PostgreSQL 设备目录
///
/// device_tokens 表按 user_id 主键保存每个用户的当前 token，
/// 替换通过 upsert 实现。
pub struct PgDeviceDirectory {
    pool: PgPool,
}

impl PgDeviceDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceDirectory for PgDeviceDirectory {
    async fn get_token(&self, user_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT token
            FROM device_tokens
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("token")))
    }

    async fn set_token(&self, user_id: &str, token: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_tokens (user_id, token, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET token = EXCLUDED.token, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        debug!(user_id, "设备 token 已更新");
        Ok(())
    }
}
