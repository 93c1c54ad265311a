use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use memos_sync::memos::{ListQuery, Memo, MemosClient};
use memos_sync::{logging, Config, Identity, Session, TimelineKind};

#[derive(Parser, Debug)]
#[command(name = "memos-sync")]
#[command(about = "Sync and cache memos from a Memos server")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/memos-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sync a timeline from the server into the local cache
  Sync {
    /// Only memos carrying this tag
    #[arg(short, long)]
    tag: Option<String>,
    /// Sync archived memos
    #[arg(long, conflicts_with_all = ["tag", "pinned"])]
    archived: bool,
    /// Sync the pinned set
    #[arg(long, conflicts_with = "tag")]
    pinned: bool,
    /// Stop after this many memos
    #[arg(short, long)]
    max: Option<usize>,
  },
  /// List cached memos without contacting the server
  List {
    #[arg(short, long)]
    tag: Option<String>,
    #[arg(long)]
    pinned: bool,
    #[arg(long)]
    archived: bool,
    #[arg(short, long, default_value_t = 20)]
    limit: usize,
    #[arg(short, long, default_value_t = 0)]
    offset: usize,
  },
  /// Show home-screen counters
  Stats,
}

fn print_memo(memo: &Memo) {
  let first_line = memo.content.lines().next().unwrap_or_default();
  let pin = if memo.pinned { "*" } else { " " };
  println!("{} {} {:<24} {}", pin, memo.display_time, memo.name, first_line);
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config.log_dir()?)?;

  let token = Config::get_access_token()?;
  let client = Arc::new(MemosClient::new(&config.server, token)?);
  let storage = config.cache.open_storage()?;
  let session = Session::open(Identity::from(&config.server), &config, client, storage)?;

  let outcome = run(&session, args.command).await;
  let report = session.close().await;
  info!(written = report.written, failed = report.failed, "Final cache flush");

  outcome
}

async fn run(session: &Session, command: Command) -> Result<()> {
  match command {
    Command::Sync {
      tag,
      archived,
      pinned,
      max,
    } => {
      let kind = if pinned {
        TimelineKind::Pinned
      } else if archived {
        TimelineKind::Archived
      } else if let Some(tag) = tag {
        TimelineKind::Tag(tag)
      } else {
        TimelineKind::Home
      };

      let next = session.sync(&kind, max).await?;
      let memos = session.timeline(&kind).snapshot().await;
      println!("Synced {} memos", memos.len());
      if next.is_some() {
        println!("More memos remain on the server");
      }
    }
    Command::List {
      tag,
      pinned,
      archived,
      limit,
      offset,
    } => {
      let memos = session.list_cached(&ListQuery {
        offset,
        limit,
        tag,
        pinned,
        archived,
      });
      for memo in &memos {
        print_memo(memo);
      }
    }
    Command::Stats => {
      let stats = session.home_stats().await?;
      println!("Memos:  {}", stats.data.memos_count);
      println!("Pinned: {}", stats.data.pinned_memos_count);
      println!("Tags:   {} ({})", stats.data.tags_count, stats.data.tags.join(", "));
      if let Some(cached_at) = stats.cached_at {
        println!("(offline, cached {})", cached_at.format("%Y-%m-%d %H:%M"));
      }
    }
  }

  Ok(())
}
