//! Main application entry point.

use std::process::ExitCode;

use clap::Parser;
use inkroom_app::SnapshotArgs;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = SnapshotArgs::parse();
    log::info!("Capturing room {} from {}", args.room, args.url);

    match inkroom_app::run(&args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
