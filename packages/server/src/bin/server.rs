//! Distributed WebSocket chat room server.
//!
//! Terminates WebSocket connections and coordinates rooms and memberships
//! with the rest of the fleet through a shared Redis store.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-server
//! cargo run --bin hiroba-server -- --host 0.0.0.0 --port 3000 --redis-url redis://127.0.0.1:6379
//! ```

use std::sync::Arc;

use clap::Parser;
use uuid::Uuid;

use hiroba_server::{
    domain::ChatStore,
    infrastructure::{message_pusher::SocketRegistry, store::RedisChatStore},
    ui::Server,
    usecase::RoomCoordinator,
};
use hiroba_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "hiroba-server")]
#[command(about = "Distributed WebSocket chat room server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// URL of the shared Redis store
    #[arg(short = 'r', long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_PKG_NAME"), "debug");

    let args = Args::parse();

    // このプロセスの識別子。発行するエンベロープのタグになる。
    let server_id = Uuid::new_v4().to_string();

    // Initialize dependencies in order:
    // 1. Shared store gateway (Redis)
    // 2. Socket registry (local fanout)
    // 3. Coordinator + event pump
    // 4. Server

    // 1. Connect to the shared store
    let (store, events) = match RedisChatStore::connect(&args.redis_url).await {
        Ok(connected) => connected,
        Err(e) => {
            tracing::error!("failed to connect to the room store: {}", e);
            std::process::exit(1);
        }
    };
    let store: Arc<dyn ChatStore> = Arc::new(store);
    tracing::info!("Connected to room store at {}", args.redis_url);

    // 2. Create the socket registry
    let pusher = Arc::new(SocketRegistry::new());

    // 3. Create the coordinator and start pumping published events into it
    let coordinator = Arc::new(RoomCoordinator::new(store, pusher, server_id.clone()));
    coordinator.clone().spawn_event_pump(events);
    tracing::info!("Server {} joining the fleet", server_id);

    // 4. Create and run the server
    let server = Server::new(coordinator);
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
