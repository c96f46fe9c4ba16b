use clap::{Parser, Subcommand};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "resilience-cli")]
#[command(about = "Admin CLI for the resilient invoker", long_about = None)]
struct Cli {
    /// Admin API base URL
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    /// Admin API key (`admin.api_key`)
    #[arg(short, long, env = "RESILIENCE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show admission, circuit breaker and fallback status
    Status,
    /// Force a target's circuit open
    Open {
        target: String,
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Close a target's circuit
    Reset { target: String },
    /// Zero the admission counters
    ResetStats,
}

impl Commands {
    fn route(&self) -> (Method, String, Option<Value>) {
        match self {
            Self::Status => (Method::GET, "/admin/status".into(), None),
            Self::Open { target, reason } => (
                Method::POST,
                format!("/admin/circuits/{target}/open"),
                Some(json!({ "reason": reason })),
            ),
            Self::Reset { target } => (
                Method::POST,
                format!("/admin/circuits/{target}/reset"),
                None,
            ),
            Self::ResetStats => (Method::POST, "/admin/bottleneck/reset-stats".into(), None),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (method, path, body) = cli.command.route();

    let mut request: RequestBuilder = reqwest::Client::new()
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .bearer_auth(&cli.key);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let res = request.send().await?;
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: admin API returned {status}");
        if !text.is_empty() {
            eprintln!("{text}");
        }
        std::process::exit(1);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{text}"),
    }
    Ok(())
}
