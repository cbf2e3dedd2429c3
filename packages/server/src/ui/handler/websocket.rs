//! WebSocket connection handlers.
//!
//! 1 接続 = 1 タスク。受信フレーム・送信チャンネル・心拍タイマを
//! 1 つの select ループで捌くので、接続ごとの状態（alive フラグ）に
//! 同期は要らない。コーディネータの操作はこのループから直列に呼ばれる。

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use hiroba_shared::consts::SOCKET_HEARTBEAT_INTERVAL_SEC;

use crate::infrastructure::dto::{InboundFrame, OutboundFrame, RequestType};

use super::super::state::AppState;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Register an ephemeral client for this socket. On a store failure the
    // socket is closed without ever reaching the coordinator's operations.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (socket_id, client) = match state.coordinator.register_client(tx).await {
        Ok(registered) => registered,
        Err(e) => {
            tracing::error!("failed to register client: {}", e);
            let _ = sender.close().await;
            return;
        }
    };
    let client_id = client.id;
    tracing::info!("client '{}' connected and registered", client_id);

    let mut shutdown = state.shutdown.clone();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(SOCKET_HEARTBEAT_INTERVAL_SEC));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval は生成直後に一度発火するので読み捨てる
    heartbeat.tick().await;
    // 直前の ping に pong が返っていれば true。tick ごとに倒して ping を
    // 打ち、pong で立て直す。二周沈黙したソケットは死んだとみなす。
    let mut alive = true;

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(Ok(frame)) = inbound else {
                    // 相手が閉じたか、ソケットエラー
                    break;
                };
                match frame {
                    Message::Text(text) => match serde_json::from_str::<InboundFrame>(&text) {
                        Ok(frame) => state.coordinator.dispatch(client_id, frame).await,
                        Err(e) => {
                            tracing::warn!(
                                "failed to parse inbound frame from '{}': {}",
                                client_id,
                                e
                            );
                            let notice =
                                OutboundFrame::notify("Invalid message format", RequestType::Notify);
                            if sender
                                .send(Message::Text(notice.to_json().into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    },
                    Message::Pong(_) => {
                        alive = true;
                    }
                    Message::Ping(_) => {
                        // pong は axum が自動で返す
                    }
                    Message::Close(_) => {
                        tracing::info!("client '{}' requested close", client_id);
                        break;
                    }
                    _ => {}
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    // 再整合が登録を剥がした（ストア上はもう存在しない）
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if !alive {
                    tracing::warn!("client '{}' missed heartbeat, terminating", client_id);
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                alive = false;
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                // シャットダウン通知は broadcast 済み。通常の切断経路に落とす。
                break;
            }
        }
    }

    state.coordinator.disconnect_by_socket(socket_id).await;
}
