use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ember::config::Config;
use ember::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let server = Server::bind(cfg)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut event_loop = tokio::task::spawn_blocking({
        let shutdown = Arc::clone(&shutdown);
        move || server.run(shutdown)
    });

    tokio::select! {
        res = &mut event_loop => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
            event_loop.await??;
        }
    }

    Ok(())
}
