use std::net::SocketAddr;
use std::sync::Arc;

use kube::Client;
use tokio::{task::JoinHandle, try_join};
use tracing::info;

use crate::cluster::KubeCluster;
use crate::config::ControllerConfig;
use crate::controller::{ControllerContext, run_infra_controller};
use crate::lcmconfig::{ConfigCache, watch_lcm_config};
use crate::web::run_http_server;

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &ControllerConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http.port).into()
}

/// Spawn the watcher that keeps the config cache current.
pub fn spawn_config_watcher(
    client: Client,
    cache: ConfigCache,
    cfg: &ControllerConfig,
) -> JoinHandle<anyhow::Result<()>> {
    let name = cfg.lcm_config_name.clone();
    let namespace = cfg.watch_namespace.clone();
    tokio::spawn(
        async move { watch_lcm_config(client, cache, name, namespace).await },
    )
}

/// Spawn the infra controller loop.
pub fn spawn_controller(
    client: Client,
    cache: ConfigCache,
    cfg: &ControllerConfig,
) -> JoinHandle<anyhow::Result<()>> {
    let ctx = Arc::new(ControllerContext::new(
        KubeCluster::new(client.clone()),
        cache,
        cfg.controller_image().map(str::to_string),
        cfg.requeue_interval(),
    ));
    let namespace = cfg.watch_namespace.clone();
    tokio::spawn(
        async move { run_infra_controller(client, ctx, namespace).await },
    )
}

pub fn spawn_http(addr: SocketAddr) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_http_server(addr).await })
}

/// Starts the config watcher, the controller and, when enabled, the probe
/// server. Returns once the controller has shut down or any task failed.
pub async fn run_all(
    client: Client,
    cfg: ControllerConfig,
) -> anyhow::Result<()> {
    let cache = ConfigCache::new(cfg.scope());
    let watcher = spawn_config_watcher(client.clone(), cache.clone(), &cfg);
    let controller = spawn_controller(client, cache, &cfg);

    if !cfg.http.enabled {
        info!("probe server disabled");
        tokio::select! {
            res = controller => res??,
            res = watcher => res??,
        }
        return Ok(());
    }

    let http = spawn_http(compute_http_addr(&cfg));
    tokio::select! {
        res = controller => res??,
        res = async { try_join!(watcher, http) } => {
            let (w_res, h_res) = res?;
            w_res?;
            h_res?;
        }
    }
    Ok(())
}
