//! Armature CLI — declarative infrastructure compiler and local deployer.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "armature",
    version,
    about = "Declarative infrastructure language — compile .arm sources to deployment templates, deploy locally through extensions"
)]
struct Cli {
    #[command(subcommand)]
    command: armature::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = armature::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
