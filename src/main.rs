use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use mesh_tiler::config::{CliArgs, TilerConfig};
use mesh_tiler::pipeline::Tiler;

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Init tracing
    let filter = if args.verbose {
        EnvFilter::new("mesh_tiler=debug")
    } else {
        EnvFilter::new("mesh_tiler=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config: TilerConfig = args.into();

    match Tiler::run(&config) {
        Ok(summary) => {
            println!(
                "Done: {} tiles generated in {:.2}s",
                summary.tile_count,
                summary.duration.as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            error!(%e, "Tiling failed");
            Err(anyhow::anyhow!(e)).context("mesh-tiler pipeline failed")
        }
    }
}
