use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use mimic::config::{Args, Config};
use mimic::{Cache, Engine, MitmAuthority};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("mimic: {err}");
            return ExitCode::from(2);
        }
    };

    mimic::tracing::init_tracing(config.verbose);

    if let Err(err) = run(config).await {
        tracing::error!(error = %err, "fatal");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(config: Config) -> anyhow::Result<()> {
    let cache = Cache::open(&config.database)?;
    let config = Arc::new(config);
    let engine = Arc::new(Engine::new(config.clone(), cache.clone())?);
    let authority = Arc::new(MitmAuthority::new()?);

    let admin_listener = TcpListener::bind(("0.0.0.0", config.admin_port)).await?;
    tokio::spawn({
        let cache = cache.clone();
        async move {
            if let Err(err) = mimic::admin::serve(admin_listener, cache).await {
                tracing::error!(error = %err, "admin listener failed");
            }
        }
    });

    let listener = TcpListener::bind(("0.0.0.0", config.proxy_port)).await?;
    tracing::info!(mode = %config.mode, "mimic started");
    mimic::proxy::serve(listener, engine, authority).await
}
