use std::path::PathBuf;

use anyhow::{Context, anyhow};
use chartsnap::{
    config::Config,
    dispatch::Dispatcher,
    fetch::{Fetcher, ImageSource as _},
    host::{LocalDocument, StdoutChannel, UiChannel as _},
    message::{Command, Event, StatusType},
    normalize::normalize,
    store::SqliteStore,
    validate::validate,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{error, warn};

#[derive(Parser)]
struct Opts {
    #[clap(short, long, env = "CHARTSNAP_CONFIG")]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Read commands as JSON lines on stdin and write events to stdout.
    Serve {
        #[clap(long, default_value = "sqlite::memory:")]
        store: String,
        #[clap(long, default_value = "local")]
        document: String,
        #[clap(long, default_value = "Untitled")]
        name: String,
    },
    /// Print the image URL a chart link resolves to.
    Normalize { url: String },
    /// Fetch and validate a chart link without touching any document.
    Test { url: String },
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let config = tokio::fs::read_to_string(path)
        .await
        .with_context(|| "read config")?;
    let config: Config = serde_yaml::from_str(&config)
        .with_context(|| format!("parse config from {}", path.display()))?;
    config.validate().map_err(|msg| anyhow!("{msg}"))?;
    Ok(config)
}

async fn serve(config: Config, store: &str, document: String, name: String) -> anyhow::Result<()> {
    let fetcher = Fetcher::new(config.fetch.clone()).with_context(|| "build http client")?;
    let store = SqliteStore::open(store)
        .await
        .with_context(|| format!("open store {store}"))?;
    let dispatcher = Dispatcher::new(
        LocalDocument::new(document, name),
        store,
        fetcher,
        StdoutChannel,
        config,
    );
    dispatcher.start().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.with_context(|| "read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Command>(&line) {
            Ok(command) => dispatcher.dispatch(command).await,
            Err(error) => {
                warn!(%error, %line, "unrecognised command");
                dispatcher.ui().post(Event::Error {
                    message: format!("Unrecognised command: {error}"),
                    context: None,
                    status_type: Some(StatusType::Error),
                });
            }
        }
    }
    Ok(())
}

async fn test(config: Config, url: &str) -> anyhow::Result<()> {
    let normalized = normalize(url, &config.links)?;
    let fetcher = Fetcher::new(config.fetch).with_context(|| "build http client")?;
    let image = fetcher.fetch(&normalized).await?;
    validate(&image.bytes, &image.content_type, &normalized)?;
    println!(
        "{normalized}: {} bytes, {}",
        image.bytes.len(),
        if image.content_type.is_empty() {
            "(no content type)"
        } else {
            image.content_type.as_str()
        }
    );
    Ok(())
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let config = load_config(opts.config.as_ref()).await?;
    match opts.command {
        Cmd::Serve {
            store,
            document,
            name,
        } => serve(config, &store, document, name).await,
        Cmd::Normalize { url } => {
            println!("{}", normalize(&url, &config.links)?);
            Ok(())
        }
        Cmd::Test { url } => test(config, &url).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run(opts).await {
        error!(?e, "critical error");
        std::process::exit(1);
    }
}
