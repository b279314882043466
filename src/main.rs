use anyhow::{anyhow, Result};
use dynward::acme::{ChallengeCoordinator, OrderDriver, PropagationProbe};
use dynward::config::{Config, SharedConfig};
use dynward::error::Error::Dns;
use dynward::store::{DynStore, FileStore};
use dynward::CertCache;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let args: Vec<String> = std::env::args().collect();
    let config_file = match args.as_slice() {
        // Exactly one positional argument: the config path.
        [_, config_file] => config_file,
        [program_name, ..] => return Err(anyhow!("usage: {program_name} /path/to/config.toml")),
        [] => return Err(anyhow!("usage: dynward /path/to/config.toml")),
    };

    let config = config_init(config_file)?;
    let store: DynStore = Arc::new(FileStore::open(&config.db.directory)?);

    // The propagation probe asks the zone's own nameserver, which is this
    // process unless the operator points it elsewhere.
    let probe_addr = config.acme.probe_addr.unwrap_or_else(|| {
        SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            config.dns.udp_bind_addr.port(),
        )
    });
    let coordinator = ChallengeCoordinator::new(store.clone());
    let probe = PropagationProbe::new(probe_addr)
        .map_err(|err| anyhow!("propagation probe setup failed: {err}"))?;
    let driver = Arc::new(OrderDriver::new(
        config.clone(),
        store.clone(),
        coordinator,
        probe,
    ));
    let certs = CertCache::new(config.clone(), store.clone(), driver);

    tracing::info!("DNS listening on UDP {}", &config.dns.udp_bind_addr);
    tracing::info!("DNS listening on TCP {}", &config.dns.tcp_bind_addr);
    let dns_server = dynward::dns::new(config.clone(), store.clone()).await?;
    let dns_handle = tokio::spawn(dns_server.block_until_done());

    tracing::info!("API listening on {}", &config.api.bind_addr);
    let router = dynward::api::router(config.clone(), store.clone(), certs.clone());
    let api_handle = tokio::spawn(dynward::tls::serve(config.api.bind_addr, router, certs));

    // TODO(XXX): proper graceful shutdown.
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        },
        Ok(dns_res) = dns_handle => {
            if let Err(err) = dns_res {
                return Err(Dns(err).into())
            }
        }
        Ok(api_res) = api_handle => {
            if let Err(err) = api_res {
                return Err(err.into())
            }
        }
    }
    tracing::info!("goodbye");
    Ok(())
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dynward=info".into()),
        )
        .init();
}

fn config_init(config_file: &str) -> Result<SharedConfig> {
    let config = Config::try_from_file(config_file)?;
    tracing::debug!("loaded config from {config_file}");
    Ok(Arc::new(config))
}
