use std::env;

use log::info;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use webrtc_pubsub_relay::config::RelayConfig;
use webrtc_pubsub_relay::router::create_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = RelayConfig::from_env()?;
    if let Some(address) = env::args().nth(1) {
        config.address = address;
    }

    TermLogger::init(
        config.level_filter()?,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let address = config.socket_address()?;
    info!("relay listening on {}", address);
    axum::Server::bind(&address)
        .serve(create_router().into_make_service())
        .await?;
    Ok(())
}
