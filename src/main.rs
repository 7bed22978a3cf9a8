use clap::Parser;
use env_logger::Env;

use valve_condition_api::{server, Config, Predictor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::parse();

    // Any missing or unreadable artifact aborts startup.
    let predictor = Predictor::load(&config.artifact_paths(), &config.dataset_options())?;

    server::serve(config.bind, predictor).await
}
