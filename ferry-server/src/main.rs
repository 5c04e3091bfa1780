use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ferry_api::prelude::*;

/// ferry - FERRY identity and affiliation administration API server
#[derive(Parser)]
#[command(name = "ferry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the configuration file; searched for when omitted
    #[arg(short = 'c', long = "config-dir", env = "FERRY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Configuration file name, without the .toml extension
    #[arg(short = 'f', long = "file", default_value = "default")]
    file: String,
}

impl Cli {
    fn load_config(&self) -> ferry_api::error::Result<Config> {
        match &self.config_dir {
            Some(dir) => Config::load_from(dir.join(format!("{}.toml", self.file))),
            None => Config::discover(&self.file),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = cli
        .load_config()
        .with_context(|| format!("loading configuration {}", cli.file))?;
    init_tracing(&config)?;

    let state = AppState::builder()
        .config(config.clone())
        .build()
        .await
        .context("building application state")?;

    let mut apis = ApiCollection::new();
    endpoints::register(&mut apis);

    Server::new(config).serve(apis.into_router(state)).await?;
    Ok(())
}
