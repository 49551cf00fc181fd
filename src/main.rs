use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mangahubd::broadcast::ProgressReceipt;
use mangahubd::core::{DeliveryReport, Orchestrator};
use mangahubd::rpc::{RpcClient, ServerStatus};
use mangahubd::{config, logging};
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "mangahubd")]
#[command(about = "Real-time sync, notification and chat server for MangaHub", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Control RPC address used by the client commands
    #[arg(long, global = true, default_value = "127.0.0.1:9092")]
    rpc: SocketAddr,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Serve(ServeArgs),
    /// Show server status
    Status,
    /// Publish a reading progress change
    Progress {
        #[arg(long)]
        user: String,
        #[arg(long)]
        manga: String,
        #[arg(long)]
        chapter: u32,
    },
    /// Announce a new chapter to notification clients
    Announce {
        #[arg(long)]
        manga: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        chapter: u32,
    },
}

#[derive(Args, Serialize)]
struct ServeArgs {
    #[serde(skip)]
    #[arg(long)]
    config: Option<PathBuf>,

    #[serde(skip_serializing_if = "is_false")]
    #[arg(long)]
    verbose: bool,

    #[serde(skip_serializing_if = "is_false")]
    #[arg(long)]
    json_logs: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    sync_bind: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    notify_bind: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    http_bind: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    rpc_bind: Option<SocketAddr>,
}

fn is_false(value: &bool) -> bool {
    !value
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve(args) => run_server(args).await.context("Failed to run server")?,
        Commands::Status => run_status(cli.rpc).await.context("Failed to check server status")?,
        Commands::Progress {
            user,
            manga,
            chapter,
        } => run_progress(cli.rpc, user, manga, *chapter)
            .await
            .context("Failed to publish progress")?,
        Commands::Announce {
            manga,
            title,
            chapter,
        } => run_announce(cli.rpc, manga, title, *chapter)
            .await
            .context("Failed to announce chapter")?,
    }

    Ok(())
}

async fn run_server(args: &ServeArgs) -> Result<()> {
    let config = config::AppConfig::load(args.config.as_deref(), Some(args))?;
    logging::init(logging::LogConfig::from(&config));

    Orchestrator::new(config).start().await
}

async fn run_status(rpc: SocketAddr) -> Result<()> {
    let status: ServerStatus = RpcClient::new(rpc).call("server.status", None).await?;

    println!("mangahubd {} (up {}s)", status.version, status.uptime_secs);
    println!("  sync:   {}", listener(status.sync));
    println!("  notify: {}", listener(status.notify));
    println!("  http:   {}", status.http_bind);
    println!("  rpc:    {}", status.rpc_bind);
    Ok(())
}

fn listener(addr: Option<SocketAddr>) -> String {
    match addr {
        Some(addr) => addr.to_string(),
        None => "unavailable".to_string(),
    }
}

async fn run_progress(rpc: SocketAddr, user: &str, manga: &str, chapter: u32) -> Result<()> {
    let params = json!({ "user_id": user, "manga_id": manga, "chapter": chapter });
    let receipt: ProgressReceipt = RpcClient::new(rpc).call("progress.update", Some(params)).await?;

    println!(
        "queued: {}, notified: {} sent / {} failed",
        receipt.queued, receipt.notified.sent, receipt.notified.failed
    );
    Ok(())
}

async fn run_announce(rpc: SocketAddr, manga: &str, title: &str, chapter: u32) -> Result<()> {
    let params = json!({ "manga_id": manga, "manga_title": title, "chapter": chapter });
    let report: DeliveryReport = RpcClient::new(rpc).call("notify.chapter", Some(params)).await?;

    println!("announced to {} clients ({} failed)", report.sent, report.failed);
    Ok(())
}
