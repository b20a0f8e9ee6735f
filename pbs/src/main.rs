//! Thin CLI entrypoint: load configuration, then hand off to `pbs::Node`.
//! A minimal launcher is still ambient stack, the same way the rest of
//! this workspace's binaries are a few lines over a lib crate that does
//! the real work.

use clap::Parser;

use pbs::Node;

#[derive(Parser, Debug)]
#[command(name = "pbs", about = "Privacy Budget Service node")]
struct Cli {
    /// Path to a pbs.toml/pbs.yaml configuration file. Missing file is not
    /// an error; defaults and `PBS_`-prefixed environment variables still
    /// apply.
    #[arg(long)]
    config: Option<String>,

    /// Overrides `pbs_host_port` from the config file/environment.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides `partition_lock_table_name`; set to run this node as a
    /// single-writer partition owner coordinating via that lock table.
    #[arg(long)]
    partition_lock_table: Option<String>,
}

#[tokio::main]
async fn main() -> pbs_base::Result<()> {
    pbs_config::init_tracing();

    let cli = Cli::parse();
    let mut config = pbs_config::PbsConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.pbs_host_port = port;
    }
    if let Some(table) = cli.partition_lock_table {
        config.partition_lock_table_name = table;
    }

    let node = Node::build(config).await?;
    node.serve().await?;
    Ok(())
}
