use anyhow::Result;
use clap::Parser;
use env_logger::Env;

mod cli;
mod cmd_dump;
mod cmd_status;
mod cmd_verify;
mod util;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Status { dir, json } => cmd_status::exec(dir, json),

        cli::Cmd::Dump {
            dir,
            address,
            json,
            limit,
        } => cmd_dump::exec(dir, address, json, limit),

        cli::Cmd::Verify { dir, json } => cmd_verify::exec(dir, json),
    }
}
