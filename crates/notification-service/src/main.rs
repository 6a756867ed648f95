//! 通知服务
//!
//! 提供设备 token 维护、单发/批量推送通知和通知记录查询的 REST API。

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use clinic_shared::{config::AppConfig, database::Database, logging};
use notification_service::api::{self, AppState};
use notification_service::channel::{FcmChannel, PushChannel};
use notification_service::directory::{DeviceDirectory, PgDeviceDirectory};
use notification_service::dispatcher::Dispatcher;
use notification_service::fanout::FanoutCoordinator;
use notification_service::memory::MemoryPushChannel;
use notification_service::store::{NotificationStore, PgNotificationStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 统一加载配置：config/*.toml + CLINIC_ 前缀环境变量覆盖
    let config = AppConfig::load("notification-service").unwrap_or_else(|e| {
        eprintln!("配置加载失败，使用默认配置: {e}");
        AppConfig::default()
    });

    logging::init(&config.observability)?;

    info!(
        "Starting notification-service on {}",
        config.server_addr()
    );

    // 初始化基础设施
    let db = Database::connect(&config.database).await?;

    let directory: Arc<dyn DeviceDirectory> = Arc::new(PgDeviceDirectory::new(db.pool().clone()));
    let store: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(db.pool().clone()));

    // FCM 凭证缺失时退回模拟渠道（仅本地开发），生产环境拒绝启动
    let channel: Arc<dyn PushChannel> = if config.fcm.server_key.is_empty() {
        if config.is_production() {
            anyhow::bail!("生产环境必须配置 FCM server_key（CLINIC_FCM__SERVER_KEY）");
        }
        warn!("未配置 FCM server_key，使用模拟推送渠道");
        Arc::new(MemoryPushChannel::new())
    } else {
        Arc::new(FcmChannel::new(&config.fcm)?)
    };
    info!(channel = channel.name(), "推送渠道已初始化");

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&directory),
        channel,
        Arc::clone(&store),
        config.dispatch.clone(),
    ));
    let fanout = Arc::new(FanoutCoordinator::new(
        Arc::clone(&dispatcher),
        config.dispatch.max_in_flight,
    ));

    let state = AppState {
        dispatcher,
        fanout,
        directory,
        store,
        db: Some(db),
    };

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("notification-service listening on {}", config.server_addr());

    axum::serve(listener, api::router(state)).await?;

    Ok(())
}
