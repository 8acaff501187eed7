use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "router-cli")]
#[command(about = "Inspection CLI for the dynamic router", long_about = None)]
struct Cli {
    /// Base URL of the router's status listener.
    #[arg(short, long, default_value = "http://localhost:8082")]
    url: String,

    #[arg(long, default_value = "router-status")]
    user: String,

    #[arg(long, env = "ROUTER_STATUS_PASS", default_value = "")]
    pass: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the route table (host → endpoints)
    Routes,
    /// Print the router's health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Routes => {
            let res = client
                .get(format!("{}/routes", base))
                .basic_auth(&cli.user, Some(&cli.pass))
                .send()
                .await?;
            print_routes(res).await?;
        }
        Commands::Health => {
            let res = client.get(format!("{}/healthz", base)).send().await?;
            let status = res.status();
            println!("{} {}", status.as_u16(), res.text().await?.trim());
            if !status.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn print_routes(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: status endpoint returned {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
