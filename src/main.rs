use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use namedv::name::Name;
use namedv::protocols::{AdvertSync, ForwarderControl, ObjectClient, PrefixSync};
use namedv::tlv::{ControlArgs, ControlResponse};
use namedv::{Config, Router};

/// Top-level daemon configuration file; routing lives under the `dv` key.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    dv: Config,
}

#[derive(Parser, Debug)]
#[command(name = "namedv")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Validate the configuration and print the derived names, then exit.
    #[arg(long)]
    check: bool,
}

/// Forwarder stand-in that logs every management command and reports
/// success. Real forwarder integration plugs in through the
/// [`ForwarderControl`] trait.
struct DryRunForwarder;

#[async_trait]
impl ForwarderControl for DryRunForwarder {
    async fn exec_mgmt_cmd(
        &self,
        module: &str,
        cmd: &str,
        args: &ControlArgs,
    ) -> Result<ControlResponse> {
        info!(module, cmd, name = ?args.name.as_ref().map(|n| n.to_string()), "forwarder command");
        let mut res = ControlResponse::ok("OK");
        if module == "faces" && cmd == "create" {
            res.body = Some(ControlArgs { face_id: Some(1), ..Default::default() });
        }
        Ok(res)
    }
}

/// In-memory object store: serves back what was produced locally.
#[derive(Default)]
struct MemoryObjects {
    store: StdMutex<HashMap<Name, Vec<u8>>>,
}

#[async_trait]
impl ObjectClient for MemoryObjects {
    async fn produce(&self, name: &Name, content: Vec<u8>, _freshness: Duration) -> Result<Name> {
        self.store
            .lock()
            .map_err(|_| anyhow::anyhow!("object store poisoned"))?
            .insert(name.clone(), content);
        Ok(name.clone())
    }

    async fn fetch(&self, name: &Name, _must_be_fresh: bool, _lifetime: Duration) -> Result<Vec<u8>> {
        self.store
            .lock()
            .map_err(|_| anyhow::anyhow!("object store poisoned"))?
            .get(name)
            .cloned()
            .with_context(|| format!("no object stored at {name}"))
    }
}

/// Sync stand-ins: there are no peers in a standalone run, so sends are
/// logged and publications numbered locally.
struct LocalSync {
    seq: StdMutex<u64>,
}

#[async_trait]
impl AdvertSync for LocalSync {
    async fn send_state_vector(
        &self,
        sync_prefix: &Name,
        router: &Name,
        boot: u64,
        seq: u64,
    ) -> Result<()> {
        info!(%sync_prefix, %router, boot, seq, "sync interest");
        Ok(())
    }
}

#[async_trait]
impl PrefixSync for LocalSync {
    async fn publish(&self, content: Vec<u8>) -> Result<u64> {
        let mut seq = self.seq.lock().map_err(|_| anyhow::anyhow!("seq poisoned"))?;
        *seq += 1;
        info!(seq = *seq, bytes = content.len(), "prefix table publication");
        Ok(*seq)
    }

    async fn subscribe_publisher(&self, router: &Name) -> Result<()> {
        info!(%router, "subscribe to prefix feed");
        Ok(())
    }

    async fn unsubscribe_publisher(&self, router: &Name) -> Result<()> {
        info!(%router, "unsubscribe from prefix feed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let file: ConfigFile = serde_yaml::from_str(&raw).context("failed to parse configuration")?;
    let config = file.dv.validate().context("invalid configuration")?;

    if args.check {
        println!("network:            {}", config.network_name());
        println!("router:             {}", config.router_name());
        println!("advert sync:        {}", config.advert_sync_prefix());
        println!("advert data:        {}", config.advert_data_prefix());
        println!("prefix sync group:  {}", config.prefix_group_prefix());
        println!("prefix data:        {}", config.prefix_data_prefix());
        println!("management:         {}", config.mgmt_prefix());
        return Ok(());
    }

    warn!("running standalone: forwarder commands are logged, not applied");

    let sync = Arc::new(LocalSync { seq: StdMutex::new(0) });
    let router = Router::new(
        config,
        Arc::new(DryRunForwarder),
        Arc::new(MemoryObjects::default()),
        sync.clone(),
        sync,
    );

    let runner = router.clone();
    let run = tokio::spawn(async move { runner.start().await });

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal, exiting gracefully");
    router.stop();
    run.await??;

    Ok(())
}
