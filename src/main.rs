mod clock;
mod config;
mod keywords;
mod lang;
mod serve;
mod store;
mod views;

pub const USER_AGENT: &str = concat!("labelscope/", env!("CARGO_PKG_VERSION"));

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::Client;
use tracing::info;

use config::{Config, DataApiSettings};
use serve::Request;
use store::EventStore;
use store::data_api::DataApiClient;
use store::memory::MemoryStore;
use views::SemanticViews;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only views over multilingual semantic label events.
#[derive(Parser)]
#[command(name = "labelscope", version)]
struct Cli {
    /// Serve from a JSON fixture (`{"<collection>": [..]}`) instead of the Data API
    #[arg(long, global = true, value_name = "FILE")]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Newest label documents for a language
    Labels {
        lang: String,
        #[arg(long)]
        amount: Option<u32>,
        #[arg(long)]
        skip: Option<u32>,
    },
    /// Newest semantic documents for a language
    Semantics {
        lang: String,
        #[arg(long)]
        amount: Option<u32>,
        #[arg(long)]
        skip: Option<u32>,
    },
    /// Older label events joined with their redacted metadata
    Enrich {
        lang: String,
        #[arg(long)]
        amount: Option<u32>,
        #[arg(long)]
        skip: Option<u32>,
    },
    /// Labels ranked by occurrences over the last 48 hours
    Loud {
        lang: String,
        #[arg(long)]
        amount: Option<u32>,
        #[arg(long)]
        skip: Option<u32>,
    },
    /// Content ids carrying a label, most recent first
    Noogle {
        lang: String,
        label: String,
        #[arg(long)]
        amount: Option<u32>,
        #[arg(long)]
        skip: Option<u32>,
    },
    /// Per-language snapshot
    Langinfo { lang: String },
    /// Languages with keyword lists
    Languages,
    /// Keyword list for a language
    Keywords { lang: String },
    /// Every label and post for one content id
    Unit { semantic_id: String },
    /// Answer line-delimited JSON requests on stdin
    Serve,
}

impl Command {
    /// `None` for `serve`, which reads its requests from stdin.
    fn into_request(self) -> Option<Request> {
        Some(match self {
            Command::Labels { lang, amount, skip } => Request::Labels { lang, amount, skip },
            Command::Semantics { lang, amount, skip } => Request::Semantics { lang, amount, skip },
            Command::Enrich { lang, amount, skip } => Request::Enrich { lang, amount, skip },
            Command::Loud { lang, amount, skip } => Request::Loud { lang, amount, skip },
            Command::Noogle {
                lang,
                label,
                amount,
                skip,
            } => Request::Noogle {
                lang,
                label,
                amount,
                skip,
            },
            Command::Langinfo { lang } => Request::Langinfo { lang },
            Command::Languages => Request::Languages,
            Command::Keywords { lang } => Request::Keywords { lang },
            Command::Unit { semantic_id } => Request::Unit { semantic_id },
            Command::Serve => return None,
        })
    }
}

async fn run<S: EventStore>(
    store: S,
    config: &Config,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let views = SemanticViews::new(store, config);
    match command.into_request() {
        Some(request) => {
            let out = serve::dispatch(&views, request).await;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        None => {
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let mut output = tokio::io::stdout();
            serve::serve(&views, input, &mut output).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("labelscope=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.fixture {
        Some(path) => {
            info!(path = %path.display(), "using fixture store");
            let store = MemoryStore::from_fixture(&path).await?;
            run(store, &config, cli.command).await
        }
        None => {
            let settings = DataApiSettings::from_env()
                .inspect_err(|e| tracing::error!("Data API not configured: {e}"))?;
            info!(url = %settings.url, database = %settings.database, "using Data API store");
            let http = Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(HTTP_TIMEOUT)
                .build()?;
            run(DataApiClient::new(http, &settings), &config, cli.command).await
        }
    }
}
