use clap::Parser;
use courtside::app::App;
use courtside::cli::Args;
use courtside::config::Config;
use courtside::logging::setup_logging;
use figment::{Figment, providers::Env};
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config and set up logging before App::new() so startup logs are
    // never silently dropped.
    let early_config: Config = Figment::new()
        .merge(Env::raw())
        .extract()
        .expect("Failed to load config for logging setup");
    setup_logging(&early_config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting courtside"
    );

    let app = App::new().await.expect("Failed to initialize application");
    app.run().await
}
