use std::{env, process};

use ground::{
    config::{self, Command},
    health, server,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = match config::parse_args(&args) {
        Ok(Command::Help) => {
            println!("{}", config::HELP);
            return;
        }
        Ok(Command::Version) => {
            println!("ground {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Ok(Command::Run(config)) => config,
        Err(msg) => {
            eprintln!("{msg}");
            eprintln!("\n{}", config::HELP);
            process::exit(1);
        }
    };

    init_logging();

    if let Err(error) = health::check() {
        tracing::error!(%error, "refusing to start");
        process::exit(1);
    }

    if let Err(error) = server::serve(config).await {
        tracing::error!(%error, "server stopped");
        process::exit(1);
    }
}
