//! Binary entry point: parses arguments and hands off to `objsh-cli`.

use clap::Parser;
use objsh_cli::Cli;

fn main() {
    let cli = Cli::parse();
    std::process::exit(objsh_cli::run(cli));
}
