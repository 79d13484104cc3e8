use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use blast_dispatch::api::{AppState, blast_routes};
use blast_dispatch::blast::{
    BudgetHandle, Channel, Dispatcher, DispatcherDeps, JobStore, spawn_reset_ticker,
};
use blast_dispatch::channels::{ConsoleSink, MessageSink, SinkRegistry, SmsConfig, SmsSink};
use blast_dispatch::clock::{Clock, SystemClock};
use blast_dispatch::config::DispatcherConfig;
use blast_dispatch::contacts::ContactNormalizer;
use blast_dispatch::members::MemberRegistry;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; the guard must outlive the runtime to flush file logs
    let _log_guard = match std::env::var("BLAST_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, "blast-dispatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    let config = DispatcherConfig::from_env().context("invalid BLAST_* configuration")?;
    let defaults = &config.anti_spam;

    eprintln!("📣 Blast Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/blast", config.http_port);
    eprintln!(
        "   Pacing: {}-{}ms, batch {} (+{}ms)",
        defaults.min_delay_ms, defaults.max_delay_ms, defaults.batch_size, defaults.batch_delay_ms
    );
    eprintln!(
        "   Limits: {}/hour, {}/day, hours {}:00-{}:00{}",
        defaults.max_messages_per_hour,
        defaults.max_messages_per_day,
        defaults.allowed_hours_start,
        defaults.allowed_hours_end,
        if defaults.skip_weekends { ", weekdays only" } else { "" }
    );

    // ── Budget ──────────────────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let budget = BudgetHandle::spawn(clock.now());
    let _ticker = spawn_reset_ticker(
        budget.clone(),
        Arc::clone(&clock),
        config.budget_tick_interval,
    );

    // ── Transports ──────────────────────────────────────────────────────
    let sms: Arc<dyn MessageSink> = match SmsConfig::from_env() {
        Some(sms_config) => {
            eprintln!("   SMS: {}", sms_config.provider.name());
            Arc::new(SmsSink::new(sms_config))
        }
        None => {
            tracing::warn!("No SMS provider configured, SMS blasts will be logged only");
            eprintln!("   SMS: console (dry run)");
            Arc::new(ConsoleSink::new("sms"))
        }
    };
    // WhatsApp sessions are driven externally; messages are logged here.
    let whatsapp: Arc<dyn MessageSink> = Arc::new(ConsoleSink::new("whatsapp"));
    eprintln!("   WhatsApp: console (dry run)\n");

    let sinks = SinkRegistry::new()
        .with(Channel::Sms, sms)
        .with(Channel::Whatsapp, whatsapp);

    // ── Dispatcher ──────────────────────────────────────────────────────
    let members = Arc::new(MemberRegistry::new());
    let dispatcher = Dispatcher::start(
        &config,
        DispatcherDeps {
            store: Arc::new(JobStore::new()),
            budget,
            sinks,
            members: members.clone(),
            clock,
        },
    );

    // ── HTTP API ────────────────────────────────────────────────────────
    let app = blast_routes(AppState {
        dispatcher,
        members,
        normalizer: ContactNormalizer::new(config.country_code.clone()),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Blast API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
