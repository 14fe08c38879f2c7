//! CLI entry point for bnd-dyn.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

/// Parse the headers named in a bnd-dyn.toml, bind their prototypes against
/// the listed shared libraries, and print every resulting namespace as C
/// declarations (structs, typedefs, `#define`s, prototypes).
#[derive(Parser, Debug)]
#[command(
    name = "bnd-dyn",
    version,
    about = "Bind C headers to shared libraries at run time and dump the bindings"
)]
struct Cli {
    /// Path to the bnd-dyn.toml configuration file.
    #[arg(default_value = "bnd-dyn.toml")]
    config: PathBuf,

    /// Write the declaration dump here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bnd_dyn=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    bnd_dyn::run(&cli.config, cli.output.as_deref())?;
    Ok(())
}
