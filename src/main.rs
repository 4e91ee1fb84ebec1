use clap::Parser;
use std::process::ExitCode;
use treesync_lib::commands::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = treesync_lib::logging::init(cli.verbose);

    let config_dir = treesync_lib::config::config_dir();
    match commands::run(cli, &config_dir).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
