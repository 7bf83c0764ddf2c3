use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "storyreel", about = "Generate a narrated vertical slideshow video")]
pub struct Args {
    #[clap(long, default_value = "storyreel.toml")]
    pub config: PathBuf,

    #[clap(long, default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Reuse a saved script.json instead of asking the script writer
    #[clap(long)]
    pub script: Option<PathBuf>,

    /// Write a default config file and exit
    #[clap(long)]
    pub init: bool,
}
