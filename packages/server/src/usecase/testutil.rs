//! テスト用ヘルパ
//!
//! インメモリストアの backend を共有ストアに見立て、その上に
//! コーディネータ＋ソケットレジストリ＋イベントポンプ一式
//! （＝サーバプロセス 1 つ分）を組み立てる。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{Client, SocketId};
use crate::infrastructure::dto::OutboundFrame;
use crate::infrastructure::message_pusher::SocketRegistry;
use crate::infrastructure::store::{MemoryBackend, MemoryChatStore};

use super::RoomCoordinator;

pub(crate) struct TestProcess {
    pub coordinator: Arc<RoomCoordinator>,
    pub pusher: Arc<SocketRegistry>,
    _pump: JoinHandle<()>,
}

pub(crate) struct TestSocket {
    pub client: Client,
    pub socket_id: SocketId,
    pub rx: mpsc::UnboundedReceiver<String>,
}

/// 共有 backend の上にサーバプロセス 1 つ分を組み立てる
pub(crate) async fn spawn_process(backend: &Arc<MemoryBackend>, server_id: &str) -> TestProcess {
    let (store, events) = MemoryChatStore::with_backend(backend.clone());
    let pusher = Arc::new(SocketRegistry::new());
    let coordinator = Arc::new(RoomCoordinator::new(
        Arc::new(store),
        pusher.clone(),
        server_id.to_string(),
    ));
    let pump = coordinator.clone().spawn_event_pump(events);
    TestProcess {
        coordinator,
        pusher,
        _pump: pump,
    }
}

/// ソケット 1 本分（登録済みクライアント＋受信チャンネル）を開く
pub(crate) async fn connect(process: &TestProcess) -> TestSocket {
    let (tx, rx) = mpsc::unbounded_channel();
    let (socket_id, client) = process
        .coordinator
        .register_client(tx)
        .await
        .expect("registration against the memory store succeeds");
    TestSocket {
        client,
        socket_id,
        rx,
    }
}

/// 受信済みフレームを全て取り出してデコードする
pub(crate) fn drain_frames(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        frames.push(serde_json::from_str(&raw).expect("server frames always decode"));
    }
    frames
}

/// 指定した type のフレームを 1 つ取り出す（無ければ panic）
pub(crate) fn expect_frame(frames: &[OutboundFrame], kind: &str) -> OutboundFrame {
    frames
        .iter()
        .find(|frame| frame_kind(frame) == kind)
        .unwrap_or_else(|| panic!("no {kind} frame in {frames:?}"))
        .clone()
}

/// 指定した type のフレームの数
pub(crate) fn count_frames(frames: &[OutboundFrame], kind: &str) -> usize {
    frames.iter().filter(|frame| frame_kind(frame) == kind).count()
}

fn frame_kind(frame: &OutboundFrame) -> &'static str {
    match frame {
        OutboundFrame::Connect { .. } => "CONNECT",
        OutboundFrame::Create { .. } => "CREATE",
        OutboundFrame::Join { .. } => "JOIN",
        OutboundFrame::Leave { .. } => "LEAVE",
        OutboundFrame::Message { .. } => "MESSAGE",
        OutboundFrame::Rename { .. } => "RENAME",
        OutboundFrame::Notify { .. } => "NOTIFY",
    }
}
