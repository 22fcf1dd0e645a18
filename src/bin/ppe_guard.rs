//! ppe_guard - PPE compliance service
//!
//! This daemon:
//! 1. Loads the service config (file named by `PPE_CONFIG`, then `PPE_*` overrides)
//! 2. Loads the inference backend and the zone file
//! 3. Serves the HTTP API and the gRPC DetectionService side by side
//! 4. Stops both listeners on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use ppe_guard::{
    api::{ApiConfig, ApiServer},
    rpc::RpcServer,
    ServiceConfig, ServiceContext,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "PPE_CONFIG")]
    config: Option<PathBuf>,
    /// Overrides the HTTP listen address.
    #[arg(long, value_name = "HOST:PORT")]
    http_addr: Option<String>,
    /// Overrides the gRPC listen address.
    #[arg(long, value_name = "HOST:PORT")]
    rpc_addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ServiceConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.http_addr = addr;
    }
    if let Some(addr) = args.rpc_addr {
        config.rpc_addr = addr;
    }
    log::info!(
        "ppe_guard {} starting (model {}, backend {})",
        env!("CARGO_PKG_VERSION"),
        config.model.path.display(),
        config.model.backend
    );

    let ctx = Arc::new(ServiceContext::from_config(config)?);
    if !ctx.is_ready() {
        log::warn!("model not loaded; /health reports unhealthy until restart");
    }

    let api_handle = ApiServer::new(ApiConfig::from_service(&ctx), ctx.clone()).spawn()?;
    let rpc_handle = RpcServer::new(ctx.config().rpc_addr.clone(), ctx.clone()).spawn()?;
    log::info!(
        "ppe_guard running. http on {}, rpc on {}",
        api_handle.addr,
        rpc_handle.addr
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("ppe_guard waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping servers...");
    rpc_handle.stop()?;
    api_handle.stop()?;

    Ok(())
}
