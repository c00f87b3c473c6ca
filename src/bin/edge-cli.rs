use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "edge-cli")]
#[command(about = "Management CLI for the storefront edge", long_about = None)]
struct Cli {
    /// Admin API base URL.
    #[arg(short, long, default_value = "http://localhost:3081")]
    url: String,

    /// Admin API key.
    #[arg(short, long, default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service version and registry freshness
    Status,
    /// Experiments in the current snapshot
    Experiments,
    /// Content and page cache counters
    Cache,
    /// Refetch experiment definitions now
    Refresh,
    /// Invalidate cached content by tag and/or rendered pages by path
    Revalidate {
        /// Public storefront base URL (the revalidation endpoint lives there).
        #[arg(long, default_value = "http://localhost:3000")]
        edge: String,

        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long = "path")]
        paths: Vec<String>,

        #[arg(long)]
        secret: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = match cli.command {
        Commands::Status => {
            client.get(format!("{}/admin/status", cli.url)).headers(headers).send().await?
        }
        Commands::Experiments => {
            client.get(format!("{}/admin/experiments", cli.url)).headers(headers).send().await?
        }
        Commands::Cache => {
            client.get(format!("{}/admin/cache", cli.url)).headers(headers).send().await?
        }
        Commands::Refresh => {
            client.post(format!("{}/admin/registry/refresh", cli.url)).headers(headers).send().await?
        }
        Commands::Revalidate { edge, tags, paths, secret } => {
            if tags.is_empty() && paths.is_empty() {
                eprintln!("Error: give at least one --tag or --path");
                std::process::exit(2);
            }
            client
                .post(format!("{}/api/revalidate", edge.trim_end_matches('/')))
                .json(&json!({ "tags": tags, "paths": paths, "secret": secret }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
