use anyhow::Result;
use clap::Parser;
use proxy_ctl::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "proxy-ctl", about = "Control plane for a clustered NGINX reverse proxy")]
struct Cli {
    /// Path to the control-plane config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Listen address for the HTTP control/admin API
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    listen: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::get_container_cpu_limit();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        listen: cli.listen,
    }))
}
