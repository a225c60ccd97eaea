mod cli;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use ledstrip_animator::{AnimatorOptions, RunOutcome};
use ledstrip_server::{
    animation::AnimatorCommand, config::AppConfig, routes::build_app, state::AppState,
};
use ledstrip_surface::LedSurface;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{AnimateArgs, Cli, Commands, ServeArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Animate(args)) => animate(args).await,
        Some(Commands::Serve(args)) => serve(cli.config, args).await,
        None => serve(cli.config, ServeArgs::default()).await,
    }
}

async fn serve(config_file: Option<String>, args: ServeArgs) -> anyhow::Result<()> {
    init_tracing();

    let mut config =
        AppConfig::load(config_file.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(led_count) = args.led_count {
        config.led_count = led_count;
    }

    let animator = match &config.animator_program {
        Some(program) => AnimatorCommand::new(program),
        None => AnimatorCommand::current_exe().context("failed to locate the server executable")?,
    };

    let surface = Arc::new(LedSurface::new(config.led_count));
    surface.set_brightness(config.brightness);
    let state = AppState::new(&config, surface, animator);
    let animations = state.animations.clone();
    let app = build_app(state, config.log_requests);

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    info!(
        %addr,
        led_count = config.led_count,
        auth = config.use_auth,
        "starting ledstrip server"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    if animations.stop().await.unwrap_or(false) {
        info!("stopped running animation on shutdown");
    }
    Ok(())
}

/// Animator entry point. stdout carries protocol frames only, so logs go to
/// stderr, where the server picks them up.
async fn animate(args: AnimateArgs) -> anyhow::Result<()> {
    init_child_tracing();

    let options = AnimatorOptions {
        led_count: args.led_count,
        brightness: args.brightness,
        script: args.script,
    };
    let code = match ledstrip_animator::run_stdio(options).await {
        Ok(RunOutcome::Completed) | Ok(RunOutcome::Detached) => 0,
        Ok(RunOutcome::Failed(_)) => 1,
        Err(err) => {
            error!(error = %err, "animator failed");
            2
        }
    };
    // The stdin reader blocks a runtime thread indefinitely; exit instead of
    // waiting for runtime shutdown.
    std::process::exit(code)
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

fn init_child_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .init();
}
