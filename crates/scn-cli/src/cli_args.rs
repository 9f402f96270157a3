use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "scn-cli")]
#[command(about = "Lowers OpenSCENARIO documents into simulator scenes")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Lower(LowerArgs),
}

#[derive(Debug, Args)]
pub(crate) struct LowerArgs {
    /// A scenario file, or a directory searched for `*.xosc` files.
    #[arg(long = "input")]
    pub(crate) input: String,
    /// Directory receiving one `<name>.scene.json` per scenario.
    #[arg(long = "out")]
    pub(crate) out: Option<String>,
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
    /// JSON catalog of entity types and document fragments.
    #[arg(long = "catalog")]
    pub(crate) catalog: Option<String>,
}
