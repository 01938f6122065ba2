//! HTTP forwarding engine in front of the backend.
//!
//! Every inbound request has the legacy path prefix stripped and is forwarded to the single
//! configured upstream. `POST /organization/user` and `POST /user/app/grant` are intercepted
//! first and handed to the [`usersync::Orchestrator`].

pub mod config;
pub mod errors;
pub mod intercept;
pub mod metrics_defs;
pub mod proxy_service;
pub mod rewrite;

pub use errors::ProxyError;

use proxy_service::ProxyService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use usersync::Orchestrator;

pub async fn run<F>(
    config: config::Config,
    orchestrator: Arc<Orchestrator>,
    is_ready: F,
) -> Result<(), ProxyError>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let proxy_service = ProxyService::new(&config, orchestrator);
    let admin_service = AdminService::<_, ProxyError>::new(is_ready);

    let proxy_task = run_http_service(&config.listener.host, config.listener.port, proxy_service);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(proxy_task, admin_task)?;
    Ok(())
}
