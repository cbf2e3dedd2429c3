//! Redis-backed ChatStore implementation.
//!
//! コマンドは `ConnectionManager`（再接続は接続マネージャ任せ）、
//! pub/sub は専用コネクションを sink / stream に分割して使う。
//! 会員集合とカウンタを同時に触る操作は MULTI/EXEC パイプラインに
//! まとめ、プロセス間の read-modify-write 競合を作らない。

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, aio::ConnectionManager, aio::PubSubSink};
use tokio::sync::{Mutex, mpsc};

use hiroba_shared::consts::{
    CLIENT_STORE_TTL_SEC, ROOM_STORE_TTL_SEC, SERVER_STAT_STORE_TTL_SEC,
};

use crate::domain::{
    ChatStore, Client, ClientId, Room, RoomId, ServerStats, StoreError, StoreEvents,
};

use super::codec;

/// Redis を使った共有ストアゲートウェイ
pub struct RedisChatStore {
    conn: ConnectionManager,
    subscriptions: Mutex<PubSubSink>,
}

impl RedisChatStore {
    /// Connect to Redis and start the subscription listener task.
    ///
    /// Returns the store and the receiver on which envelopes published to
    /// subscribed room channels arrive. The listener task ends when the
    /// pub/sub connection drops or the receiver is dropped.
    pub async fn connect(url: &str) -> Result<(Self, StoreEvents), StoreError> {
        let client = redis::Client::open(url).map_err(to_store_error)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(to_store_error)?;
        let pubsub = client.get_async_pubsub().await.map_err(to_store_error)?;
        let (sink, mut stream) = pubsub.split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let Some(room_id) = codec::room_of_channel(msg.get_channel_name()) else {
                    continue;
                };
                let envelope: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("dropping unreadable pub/sub payload: {}", e);
                        continue;
                    }
                };
                if events_tx.send((room_id, envelope)).is_err() {
                    break;
                }
            }
            tracing::warn!("room channel subscription stream ended");
        });

        Ok((
            Self {
                conn,
                subscriptions: Mutex::new(sink),
            },
            events_rx,
        ))
    }
}

fn to_store_error(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl ChatStore for RedisChatStore {
    async fn create_client(&self, client: &Client) -> Result<(), StoreError> {
        let key = codec::client_key(client.id);
        let fields = codec::client_to_fields(client);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(&key, &fields)
            .ignore()
            .expire(&key, CLIENT_STORE_TTL_SEC)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn get_client(&self, id: ClientId) -> Result<Option<Client>, StoreError> {
        let key = codec::client_key(id);
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(&key).await.map_err(to_store_error)?;
        codec::client_from_fields(&key, &fields)
    }

    async fn update_client(
        &self,
        id: ClientId,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        codec::guard_client_update(fields)?;
        let key = codec::client_key(id);
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(&key, fields)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn set_client_room(
        &self,
        id: ClientId,
        room_id: Option<RoomId>,
    ) -> Result<(), StoreError> {
        let key = codec::client_key(id);
        let mut conn = self.conn.clone();
        match room_id {
            Some(room_id) => {
                let _: () = conn
                    .hset(&key, "roomId", room_id.to_string())
                    .await
                    .map_err(to_store_error)?;
            }
            None => {
                let _: () = conn.hdel(&key, "roomId").await.map_err(to_store_error)?;
            }
        }
        Ok(())
    }

    async fn remove_client(&self, id: ClientId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(codec::client_key(id))
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn create_room(&self, room: &Room) -> Result<(), StoreError> {
        let key = codec::room_key(room.id);
        let fields = codec::room_to_fields(room);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(&key, &fields)
            .ignore()
            .expire(&key, ROOM_STORE_TTL_SEC)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        let key = codec::room_key(id);
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(&key).await.map_err(to_store_error)?;
        codec::room_from_fields(&key, &fields)
    }

    async fn remove_room(&self, id: RoomId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(codec::room_key(id))
            .ignore()
            .del(codec::room_members_key(id))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn add_member(&self, room_id: RoomId, client_id: ClientId) -> Result<i64, StoreError> {
        let room_key = codec::room_key(room_id);
        let members_key = codec::room_members_key(room_id);
        let mut conn = self.conn.clone();
        // TTL は会員の出入りのたびに延長する（opportunistic refresh）
        let (active_users,): (i64,) = redis::pipe()
            .atomic()
            .sadd(&members_key, client_id.to_string())
            .ignore()
            .hincr(&room_key, "activeUsers", 1)
            .expire(&members_key, ROOM_STORE_TTL_SEC)
            .ignore()
            .expire(&room_key, ROOM_STORE_TTL_SEC)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(active_users)
    }

    async fn remove_member(
        &self,
        room_id: RoomId,
        client_id: ClientId,
        decrement_counter: bool,
    ) -> Result<i64, StoreError> {
        let room_key = codec::room_key(room_id);
        let members_key = codec::room_members_key(room_id);
        let mut conn = self.conn.clone();
        let (remaining,): (i64,) = if decrement_counter {
            redis::pipe()
                .atomic()
                .srem(&members_key, client_id.to_string())
                .ignore()
                .hincr(&room_key, "activeUsers", -1)
                .ignore()
                .scard(&members_key)
                .query_async(&mut conn)
                .await
                .map_err(to_store_error)?
        } else {
            // 強制退去: ルームレコードは既に無いのでカウンタは触らない
            redis::pipe()
                .atomic()
                .srem(&members_key, client_id.to_string())
                .ignore()
                .scard(&members_key)
                .query_async(&mut conn)
                .await
                .map_err(to_store_error)?
        };
        Ok(remaining)
    }

    async fn publish(&self, room_id: RoomId, envelope: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn
            .publish(codec::room_channel(room_id), envelope)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn subscribe(&self, room_id: RoomId) -> Result<(), StoreError> {
        self.subscriptions
            .lock()
            .await
            .subscribe(codec::room_channel(room_id))
            .await
            .map_err(to_store_error)
    }

    async fn unsubscribe(&self, room_id: RoomId) -> Result<(), StoreError> {
        self.subscriptions
            .lock()
            .await
            .unsubscribe(codec::room_channel(room_id))
            .await
            .map_err(to_store_error)
    }

    async fn put_server_stats(&self, stats: &ServerStats) -> Result<(), StoreError> {
        let key = codec::server_key(&stats.server_id);
        let fields = codec::server_to_fields(stats);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(&key, &fields)
            .ignore()
            .expire(&key, SERVER_STAT_STORE_TTL_SEC)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn remove_server(&self, server_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(codec::server_key(server_id))
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn list_client_ids(&self) -> Result<Vec<ClientId>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(codec::CLIENT_KEY_PATTERN)
            .await
            .map_err(to_store_error)?;
        Ok(keys
            .iter()
            .filter_map(|key| codec::client_id_of_key(key))
            .collect())
    }

    async fn list_room_ids(&self) -> Result<Vec<RoomId>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(codec::ROOM_KEY_PATTERN)
            .await
            .map_err(to_store_error)?;
        Ok(keys
            .iter()
            .filter_map(|key| codec::room_id_of_key(key))
            .collect())
    }

    async fn list_servers(&self) -> Result<Vec<ServerStats>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(codec::SERVER_KEY_PATTERN)
            .await
            .map_err(to_store_error)?;
        let mut servers = Vec::with_capacity(keys.len());
        for key in keys {
            let fields: HashMap<String, String> =
                conn.hgetall(&key).await.map_err(to_store_error)?;
            match codec::server_from_fields(&key, &fields) {
                Ok(Some(stats)) => servers.push(stats),
                Ok(None) => {}
                Err(e) => tracing::warn!("skipping unreadable server record '{}': {}", key, e),
            }
        }
        Ok(servers)
    }
}
