use liso::config::Config;
use liso::server::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::load()?;
    let mut server = Server::bind(&cfg)?;
    let handle = server.shutdown_handle();

    let mut reactor = tokio::task::spawn_blocking(move || server.run());

    tokio::select! {
        res = &mut reactor => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            handle.shutdown();
            reactor.await??;
        }
    }

    Ok(())
}
