use std::sync::Arc;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use deposit_bot::bot::Bot;
use deposit_bot::channels::{Channel, ChannelManager, CliChannel, TelegramChannel};
use deposit_bot::config::{BotConfig, TelegramMode};
use deposit_bot::error::Error;
use deposit_bot::onboarding::{
    ConversationMachine, CurrencyCatalog, OnboardingManager, OnboardingRouteState,
    onboarding_routes,
};
use deposit_bot::services::{NonEmptyHashVerifier, StaticRateProvider};
use deposit_bot::store::InMemorySessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().map_err(Error::from)?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "deposit-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("💸 Deposit Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   HTTP: http://{}/health", config.listen_addr());
    eprintln!(
        "   Verification timeout: {}s",
        config.flow.service_timeout.as_secs()
    );
    if let Some(dir) = &config.log_dir {
        eprintln!("   Logs: {dir}");
    }

    // ── Onboarding core ─────────────────────────────────────────────────
    let catalog = Arc::new(CurrencyCatalog::default());
    let machine = Arc::new(ConversationMachine::new(
        Arc::clone(&catalog),
        Arc::new(StaticRateProvider::default()),
        Arc::new(NonEmptyHashVerifier),
        config.flow.clone(),
    ));
    let manager = Arc::new(OnboardingManager::new(InMemorySessionStore::new(), machine));

    eprintln!(
        "   Currencies: {}",
        catalog.codes().collect::<Vec<_>>().join(", ")
    );

    // ── Channels ────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();
    let mut app = onboarding_routes(OnboardingRouteState {
        manager: Arc::clone(&manager),
    });

    match &config.telegram {
        Some(telegram) => {
            let channel = TelegramChannel::new(
                telegram.bot_token.clone(),
                telegram.allowed_users.clone(),
                telegram.mode.clone(),
            );

            eprintln!(
                "   Telegram: enabled (allowed: {})",
                if telegram.allowed_users.iter().any(|u| u == "*") {
                    "everyone".to_string()
                } else {
                    telegram.allowed_users.join(", ")
                }
            );
            match &telegram.mode {
                TelegramMode::Polling => eprintln!("   Telegram mode: polling"),
                TelegramMode::Webhook { base_url } => {
                    eprintln!("   Telegram mode: webhook ({base_url})");
                    app = app.merge(channel.router());
                }
            }

            if let Err(e) = channel.health_check().await {
                tracing::warn!("Telegram health check failed: {}", e);
            }
            channels.add(Box::new(channel));
        }
        None => {
            eprintln!("   Telegram: disabled (set TELEGRAM_BOT_TOKEN to enable)");
            channels.add(Box::new(CliChannel::new()));
        }
    }

    eprintln!("   Channels: {}\n", channels.names().join(", "));
    if config.telegram.is_none() {
        eprintln!("   Type a message and press Enter. Ctrl+C to exit.\n");
    }

    // ── HTTP server (health, status, Telegram webhook) ──────────────────
    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
    let app = app.layer(TraceLayer::new_for_http());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    Bot::new(manager, channels).run().await?;

    Ok(())
}
