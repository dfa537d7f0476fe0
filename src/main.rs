//! local-router CLI - HTTPS router for local development containers

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use local_router::config::CaRecovery;
use local_router::discovery::parse_route;
use local_router::tls::CA_CERT_FILE;
use local_router::{
    CertificateAuthority, CertificateCache, CertificateStore, Config, DockerRouteSource,
    RouteSource, RouteTable, RouterServer, StaticRouteSource,
};

#[derive(Parser)]
#[command(name = "local-router")]
#[command(about = "HTTPS router for local development containers")]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StorageArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Certificate storage directory (overrides config)
    #[arg(long, env = "LOCAL_ROUTER_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,
}

impl StorageArgs {
    fn load(&self) -> Result<Config, local_router::Error> {
        let mut cfg = match &self.config {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Config::from_file(path)?
            }
            None => Config::default(),
        };
        if let Some(dir) = &self.storage_dir {
            cfg.certificates.storage_dir = dir.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router
    Run {
        #[command(flatten)]
        storage: StorageArgs,

        /// HTTP listen address (overrides config)
        #[arg(long, env = "LOCAL_ROUTER_ADDR_HTTP")]
        http: Option<String>,

        /// HTTPS listen address (overrides config)
        #[arg(long, env = "LOCAL_ROUTER_ADDR_HTTPS")]
        https: Option<String>,

        /// Container label holding the hostname (overrides config)
        #[arg(long, env = "LOCAL_ROUTER_LABEL")]
        label: Option<String>,

        /// Docker Engine API socket (overrides config)
        #[arg(long)]
        docker_socket: Option<PathBuf>,

        /// Fixed route as host=address; repeatable. Disables Docker discovery.
        #[arg(long = "route", value_name = "HOST=ADDRESS")]
        routes: Vec<String>,
    },

    /// Create the root CA in the storage directory, or show the existing one
    GenerateCa {
        #[command(flatten)]
        storage: StorageArgs,

        /// Replace an unreadable CA instead of failing
        #[arg(long)]
        regenerate: bool,
    },

    /// Issue (or load) the certificate for a domain
    Issue {
        /// Domain name to issue for
        domain: String,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Validate a configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            storage,
            http,
            https,
            label,
            docker_socket,
            routes,
        } => {
            let mut cfg = match &storage.config {
                Some(path) => Config::from_file(path)?,
                None => Config::default(),
            };
            init_logging(cli.log_level.as_deref().unwrap_or(&cfg.logging.level));

            // Apply CLI and environment overrides
            if let Some(dir) = storage.storage_dir {
                cfg.certificates.storage_dir = dir;
            }
            if let Some(addr) = http {
                cfg.router.http_address = addr;
            }
            if let Some(addr) = https {
                cfg.router.https_address = addr;
            }
            if let Some(label) = label {
                cfg.discovery.label = label;
            }
            if let Some(socket) = docker_socket {
                cfg.discovery.docker_socket = socket;
            }
            cfg.validate()?;

            let static_routes = routes
                .iter()
                .map(|entry| parse_route(entry))
                .collect::<Result<RouteTable, _>>()?;

            if static_routes.is_empty() {
                tracing::info!(
                    socket = %cfg.discovery.docker_socket.display(),
                    label = %cfg.discovery.label,
                    interval_secs = cfg.discovery.refresh_interval_secs,
                    "Discovering routes from Docker"
                );
                let source =
                    DockerRouteSource::new(&cfg.discovery.docker_socket, &cfg.discovery.label);
                run(cfg, source).await?;
            } else {
                tracing::info!(routes = static_routes.len(), "Using fixed routes");
                run(cfg, StaticRouteSource::new(static_routes)).await?;
            }
        }

        Commands::GenerateCa {
            storage,
            regenerate,
        } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            let cfg = storage.load()?;
            let recovery = if regenerate {
                CaRecovery::Regenerate
            } else {
                cfg.certificates.ca_recovery
            };

            let store = CertificateStore::open(&cfg.certificates.storage_dir)?;
            let ca = CertificateAuthority::load_or_create(&store, recovery)?;
            let cert_path = store.root().join(CA_CERT_FILE);

            println!("CA ready.");
            println!();
            println!("  Certificate: {}", cert_path.display());
            println!("  Subject: {}", ca.info().subject);
            println!("  Serial: {}", ca.info().serial);
            println!("  Expires: {}", ca.info().not_after);
            println!();
            println!("To trust the CA on Ubuntu/Debian:");
            println!(
                "  sudo cp {} /usr/local/share/ca-certificates/local-router.crt",
                cert_path.display()
            );
            println!("  sudo update-ca-certificates");
        }

        Commands::Issue { domain, storage } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            let cfg = storage.load()?;
            let certs = &cfg.certificates;

            let store = CertificateStore::open(&certs.storage_dir)?;
            let ca = CertificateAuthority::load_or_create(&store, certs.ca_recovery)?;
            let cache = CertificateCache::new(
                Arc::new(ca),
                store.clone(),
                certs.lock_scope,
                certs.reissue_expired,
            );

            let leaf = cache.get_or_issue(&domain)?;
            let paths = store.leaf_paths(leaf.domain());

            println!(
                "{} certificate for {}",
                if cache.issued_count() > 0 {
                    "Issued"
                } else {
                    "Found"
                },
                leaf.domain()
            );
            println!();
            println!("  Certificate: {}", paths.cert.display());
            println!("  Private key: {}", paths.key.display());
            println!("  Serial: {}", leaf.serial());
            println!("  Expires: {}", leaf.info().not_after);
        }

        Commands::ValidateConfig { config } => {
            println!("Validating configuration: {}", config.display());

            let cfg = Config::from_file(&config)?;

            println!("Configuration is valid!");
            println!();
            println!("  HTTP address: {}", cfg.router.http_address);
            println!("  HTTPS address: {}", cfg.router.https_address);
            println!("  Backend port: {}", cfg.router.backend_port);
            println!("  Default domain: {}", cfg.router.default_domain);
            println!(
                "  Certificate storage: {}",
                cfg.certificates.storage_dir.display()
            );
            println!("  Lock scope: {:?}", cfg.certificates.lock_scope);
            println!("  CA recovery: {:?}", cfg.certificates.ca_recovery);
            println!(
                "  Reissue expired: {}",
                cfg.certificates.reissue_expired
            );
            println!("  Discovery label: {}", cfg.discovery.label);
            println!(
                "  Docker socket: {}",
                cfg.discovery.docker_socket.display()
            );
            println!(
                "  Refresh interval: {}s",
                cfg.discovery.refresh_interval_secs
            );
            println!("  Log level: {}", cfg.logging.level);
        }
    }

    Ok(())
}

async fn run<S>(cfg: Config, source: S) -> Result<(), Box<dyn std::error::Error>>
where
    S: RouteSource + 'static,
{
    let server = RouterServer::new(cfg)?;

    // Handle Ctrl+C
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down...");
        let _ = shutdown_tx.send(());
    });

    server.run_until_shutdown(source, shutdown_rx).await?;
    Ok(())
}
