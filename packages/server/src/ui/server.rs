//! Server execution logic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{Router, routing::get};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use hiroba_shared::consts::SERVER_STAT_UPDATE_INTERVAL_SEC;

use crate::usecase::RoomCoordinator;

use super::{
    handler::{http::health_check, websocket::websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Distributed WebSocket chat room server
///
/// 1 プロセス分のルータと常駐タスク（サーバ統計の更新）を束ね、
/// シャットダウンの順序を守る：統計タイマ停止 → 切断通知 →
/// ソケットの通常切断 → 最後にサーバレコード削除。
pub struct Server {
    coordinator: Arc<RoomCoordinator>,
}

impl Server {
    /// Create a new Server instance
    pub fn new(coordinator: Arc<RoomCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Run the server until a shutdown signal arrives.
    ///
    /// # Arguments
    ///
    /// * `host` - The host address to bind to (e.g., "127.0.0.1")
    /// * `port` - The port number to bind to (e.g., 8080)
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address
    /// or if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app_state = Arc::new(AppState {
            coordinator: self.coordinator.clone(),
            started_at: Instant::now(),
            shutdown: shutdown_rx,
        });

        let app = Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(app_state);

        // 管理面に見せる統計レコードを定期更新する
        let stats_coordinator = self.coordinator.clone();
        let stats_task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(SERVER_STAT_UPDATE_INTERVAL_SEC));
            loop {
                interval.tick().await;
                if let Err(e) = stats_coordinator.publish_server_stats().await {
                    tracing::warn!("failed to refresh server record: {}", e);
                }
            }
        });

        let bind_addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

        tracing::info!(
            "WebSocket chat server listening on {}",
            listener.local_addr()?
        );
        tracing::info!("Connect to: ws://{}/ws", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        // シグナル受信後は、全ソケットへ通知してから watch を倒す。
        // 各接続は自分の切断経路を通って掃除され、serve がその完了を待つ。
        let coordinator = self.coordinator.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                tracing::info!("shutdown signal received, notifying clients");
                coordinator.notify_shutdown().await;
                let _ = shutdown_tx.send(true);
            })
            .await?;

        // 全ソケットの掃除が終わってから、このプロセスの存在レコードを消す
        stats_task.abort();
        self.coordinator.remove_server_record().await;
        tracing::info!("Server shutdown complete");

        Ok(())
    }
}
