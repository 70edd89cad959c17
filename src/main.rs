use clap::Parser;

use emby_proxy::config::Cli;
use emby_proxy::lifecycle::startup;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = startup::run(cli).await {
        eprintln!("emby-proxy: {e}");
        std::process::exit(1);
    }
}
