use serenity::{async_trait, http::Http, model::gateway::Ready, prelude::*};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod admission;
mod chat;
mod clock;
mod config;
mod engine;
mod error;
mod event;
mod persistence;
mod promotion;
mod registration;
mod scheduler;
mod store;
mod time;
mod util;

use chat::SerenityChatClient;
use config::Config;
use engine::Engine;

struct Handler;

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);
        debug!("Ready data: {:?}", ready);
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to start the logger");

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_owned());
    let config = Config::load(&config_path)
        .await
        .expect("Failed to load config.json");

    info!(guilds = ?config.guilds, "starting with configured guilds");

    let http = Arc::new(Http::new(&format!("Bot {}", config.discord_token)));
    let chat_client: Arc<dyn chat::ChatClient> = Arc::new(SerenityChatClient::new(Arc::clone(&http)));

    let engine = Engine::open(&config, clock::real_clock(), chat_client)
        .await
        .expect("Failed to open event/registration stores");

    let mut client = Client::builder(&config.discord_token)
        .event_handler(Handler)
        .type_map_insert::<EngineKey>(engine)
        .await
        .expect("Error creating client");

    client.start().await.expect("Client error");
}

struct EngineKey;

impl TypeMapKey for EngineKey {
    type Value = Arc<Engine>;
}
