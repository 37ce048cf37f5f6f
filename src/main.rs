#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use gonvey::config::CliOverrides;
use gonvey::server::bootstrap;

#[derive(Parser)]
#[command(name = "gonvey", about = "Path-routing HTTP reverse proxy")]
struct Cli {
    /// Listening port (shadows GONVEY_SERVER_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level: DEBUG, INFO, WARNING, ERROR or FATAL (shadows GONVEY_LOG_LEVEL)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Routing table as JSON, e.g. '{"/app":["http://127.0.0.1:4242"]}'
    /// (shadows GONVEY_PROXY_MAP)
    #[arg(short = 'm', long)]
    proxy_map: Option<String>,

    /// Address of the consul agent backing dynamic configuration
    /// (shadows GONVEY_CONSUL_ADDRESS)
    #[arg(long)]
    consul_address: Option<String>,

    /// Prometheus push gateway base URL; empty keeps metrics scrape-only
    /// (shadows GONVEY_METRICS_GATEWAY)
    #[arg(long)]
    metrics_gateway: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(bootstrap::run(bootstrap::BootstrapArgs {
        overrides: CliOverrides {
            log_level: cli.log_level,
            port: cli.port,
            proxy_map: cli.proxy_map,
            consul_address: cli.consul_address,
            metrics_gateway: cli.metrics_gateway,
        },
    }))
}
