mod cli;
mod terminal;

use clap::Parser;

fn main() {
    let args = cli::Args::parse();
    if let Err(err) = cli::dispatch(args) {
        eprintln!("docbatch: {:#}", err);
        std::process::exit(1);
    }
}
