use std::{fmt, io, sync::Arc};

use comms::{HttpRouter, Router, SiteStatus};
use controller::{ArtifactStore, ControllerConfig, Dispatcher, Registry, SnapshotCache};
use log::{info, warn};
use tokio::{
    signal,
    time::{self, MissedTickBehavior},
};

/// The signal that stopped the controller loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    CtrlC,
    Terminate,
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shutdown::CtrlC => write!(f, "Ctrl-C"),
            Shutdown::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Resolves once SIGTERM arrives. Never resolves off unix.
async fn terminate() -> io::Result<()> {
    #[cfg(unix)]
    {
        signal::unix::signal(signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        std::future::pending().await
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = ControllerConfig::from_env()?;

    let mut router = HttpRouter::new(
        config.router_url.clone(),
        config.http_timeout,
        config.http_retries,
    )
    .map_err(io::Error::other)?;
    if let Some(username) = config.router_username.clone() {
        router = router.with_basic_auth(username, config.router_password.clone());
    }
    let router: Arc<dyn Router> = Arc::new(router);

    let mut dispatcher = Dispatcher::new(
        config.site_uid.clone(),
        router,
        ArtifactStore::new(&config.data_dir),
        Registry::standard(),
        SnapshotCache::in_memory(),
        config.max_concurrent_jobs,
    );
    dispatcher.reset();

    info!(
        site_uid = config.site_uid.as_str();
        "site controller started, router at {}, data in {}",
        config.router_url,
        config.data_dir.display()
    );

    let mut fetch = time::interval(config.fetch_interval);
    let mut monitor = time::interval(config.monitor_interval);
    let mut heartbeat = time::interval(config.heartbeat_interval);
    for interval in [&mut fetch, &mut monitor, &mut heartbeat] {
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    let sigterm = terminate();
    tokio::pin!(sigterm);

    let reason = loop {
        tokio::select! {
            _ = fetch.tick() => {
                if let Err(e) = dispatcher.fetch_cycle().await {
                    warn!("fetching runs failed: {e}");
                }
            }
            _ = monitor.tick() => {
                if let Err(e) = dispatcher.monitor_cycle().await {
                    warn!("monitoring runs failed: {e}");
                }
            }
            _ = heartbeat.tick() => dispatcher.heartbeat(SiteStatus::Alive).await,
            _ = signal::ctrl_c() => break Shutdown::CtrlC,
            res = &mut sigterm => {
                res?;
                break Shutdown::Terminate;
            }
        }
    };

    info!("received {reason}, shutting down");

    info!("wrapping up, waiting for running jobs...");
    dispatcher.wait_idle().await;
    dispatcher.heartbeat(SiteStatus::Exited).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_names_the_signal_received() {
        assert_eq!(Shutdown::CtrlC.to_string(), "Ctrl-C");
        assert_eq!(Shutdown::Terminate.to_string(), "SIGTERM");
    }
}
