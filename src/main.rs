use std::io::{self, Read};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use tracing::warn;

use blog_translator::{Cancellation, Config, InputFormat};

#[derive(Parser, Debug)]
#[command(
    name = "blog-translator",
    version,
    about = "Translate blog HTML and rich-text JSON documents with an LLM"
)]
struct Cli {
    /// Target language (e.g. Turkish, de)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Source language
    #[arg(short = 'L', long = "source-lang", default_value = "English")]
    source_lang: String,

    /// Input format
    #[arg(short = 'F', long = "format", value_enum, default_value_t = Format::Html)]
    format: Format,

    /// File to translate (reads stdin when omitted)
    #[arg(short = 'd', long = "data")]
    data: Option<String>,

    /// Model name or provider:model (e.g. openai:gpt-4.1-nano)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Append token usage to output
    #[arg(long = "with-using-tokens")]
    with_using_tokens: bool,

    /// Append the estimated cost to output
    #[arg(long = "with-cost")]
    with_cost: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,

    /// Run the HTTP server on ADDR (e.g. 127.0.0.1:8080)
    #[arg(long = "server", value_name = "ADDR")]
    server: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Html,
    Json,
}

impl From<Format> for InputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Html => InputFormat::Html,
            Format::Json => InputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    blog_translator::logging::init(cli.verbose)?;

    if let Some(addr) = cli.server {
        let settings = blog_translator::settings::load_settings(
            cli.read_settings.as_deref().map(std::path::Path::new),
        )?;
        return blog_translator::server::run_server(settings, addr, cli.model, cli.key).await;
    }

    let lang = cli
        .lang
        .ok_or_else(|| anyhow!("--lang is required unless --server is given"))?;
    let input = match cli.data.as_deref() {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file: {}", path))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .with_context(|| "stdin must be UTF-8 text")?;
            buffer
        }
    };

    let (handle, cancel) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling translation");
            handle.cancel();
        }
    });

    let output = blog_translator::run(
        Config {
            format: cli.format.into(),
            lang,
            source_lang: cli.source_lang,
            model: cli.model,
            key: cli.key,
            settings_path: cli.read_settings,
            with_using_tokens: cli.with_using_tokens,
            with_cost: cli.with_cost,
        },
        input,
        &cancel,
    )
    .await?;

    println!("{}", output);
    Ok(())
}
