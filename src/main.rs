use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use iblog_sync::config::Config;
use iblog_sync::remote::{ArticleId, FilterKey, HttpDataSource, RemoteDataSource};
use iblog_sync::storage::{CommentId, CommentRecord, Database, DatabaseError, PersistedCommentCache};
use iblog_sync::sync::{CommentSyncEngine, FeedController, SequencedFetcher};
use iblog_sync::{SessionContext, SyncError};

/// Get the config directory path (~/.config/iblog/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("iblog"))
}

#[derive(Parser, Debug)]
#[command(name = "iblog", about = "Command-line client for the iBlog API")]
struct Args {
    /// Comment cache database (defaults to ~/.config/iblog/comments.db)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// API base URL (overrides config)
    #[arg(long, value_name = "URL", global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List articles, newest first
    Feed {
        /// Full-text search (wins over --category)
        #[arg(long)]
        search: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// Number of pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Show one article
    Article { id: ArticleId },
    /// Show an article's comments (cached copy if offline)
    Comments { id: ArticleId },
    /// Post a comment
    Comment { id: ArticleId, body: String },
    /// Like a comment
    Like {
        article_id: ArticleId,
        comment_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let mut config = Config::load(&config_dir.join("config.toml")).context("Failed to load config")?;
    if let Some(base_url) = args.base_url {
        config.api_base_url = base_url;
    }

    let http_client = reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let remote = Arc::new(
        HttpDataSource::new(http_client, &config.api_base_url)
            .context("Invalid api_base_url")?
            .with_timeout(config.request_timeout()),
    );
    let session = SessionContext::init(&config);

    match args.command {
        Command::Feed {
            search,
            category,
            pages,
        } => {
            let filter = FilterKey::new(search.as_deref(), category.as_deref());
            run_feed(&session, remote, filter, pages).await
        }
        Command::Article { id } => {
            let article = remote
                .get_article(id)
                .await
                .with_context(|| format!("Failed to fetch article {}", id))?;
            println!("{}", article.summary.title);
            if let Some(author) = &article.summary.author_name {
                println!("by {}", author);
            }
            println!(
                "{} likes, {} views, {} collects",
                article.summary.likes, article.summary.views, article.collects
            );
            println!();
            println!("{}", article.content);
            Ok(())
        }
        Command::Comments { id } => {
            let mut engine = open_engine(&session, remote, args.db, &config_dir).await?;
            let view = engine.load(id).await?;
            if let Some(err) = &view.error {
                eprintln!("Warning: showing cached comments ({})", err);
            }
            print_comments(&view.records);
            for orphan in &view.orphaned {
                eprintln!("Unsent comment (never reached the server): {}", orphan.body);
            }
            Ok(())
        }
        Command::Comment { id, body } => {
            let mut engine = open_engine(&session, remote, args.db, &config_dir).await?;
            // Best effort: pull the current list so the new comment lands on top of it
            let view = engine.load(id).await?;
            if let Some(err) = view.error {
                tracing::warn!(article_id = id, error = %err, "Posting without a fresh comment list");
            }

            match engine.add_and_sync(id, &body).await {
                Ok(record) if record.local_only => {
                    println!("Not signed in: comment saved on this device only.");
                    Ok(())
                }
                Ok(record) => {
                    println!("Posted comment {}", record.id);
                    Ok(())
                }
                Err(SyncError::ReconciliationFailure {
                    original_body: Some(original),
                    cause,
                    ..
                }) => {
                    eprintln!("Comment was not posted: {}", cause);
                    eprintln!("Your text: {}", original);
                    std::process::exit(1);
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Like {
            article_id,
            comment_id,
        } => {
            let mut engine = open_engine(&session, remote, args.db, &config_dir).await?;
            engine.load(article_id).await?;
            let record = engine
                .like(&CommentId::server(comment_id))
                .await
                .with_context(|| format!("Failed to like comment {}", comment_id))?;
            println!("Comment {} now has {} likes", record.id, record.like_count);
            Ok(())
        }
    }
}

async fn run_feed<R: RemoteDataSource>(
    session: &SessionContext,
    remote: Arc<R>,
    filter: FilterKey,
    pages: usize,
) -> Result<()> {
    let fetcher = Arc::new(SequencedFetcher::new(remote, session.settings().request_timeout));
    let mut feed = FeedController::new(session, fetcher);

    let mut result = feed.reset_now(filter).await.map(|_| ());
    for _ in 1..pages {
        if result.is_err() || !feed.state().has_more() {
            break;
        }
        result = feed.load_next_page_now().await.map(|_| ());
    }

    for article in feed.items() {
        let date = article
            .created_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!(
            "{:>6}  {:<10}  {}  ({})",
            article.id,
            date,
            article.title,
            article.category.as_deref().unwrap_or("-")
        );
    }

    // Keep whatever loaded and report the failure after it
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    if feed.state().has_more() {
        println!("(more available, use --pages)");
    }
    Ok(())
}

async fn open_engine<R: RemoteDataSource>(
    session: &SessionContext,
    remote: Arc<R>,
    db_path: Option<PathBuf>,
    config_dir: &std::path::Path,
) -> Result<CommentSyncEngine<R>> {
    let db_path = db_path.unwrap_or_else(|| config_dir.join("comments.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another iblog process is using the comment cache. Please try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let cache = PersistedCommentCache::new(db, session.settings().cache_capacity);
    Ok(CommentSyncEngine::new(session, remote, cache))
}

fn print_comments(records: &[CommentRecord]) {
    if records.is_empty() {
        println!("No comments yet.");
        return;
    }
    for record in records {
        let marker = if record.local_only {
            " [local]"
        } else if record.pending {
            " [sending]"
        } else {
            ""
        };
        println!(
            "#{} {} ({} likes){}",
            record.id, record.author_name, record.like_count, marker
        );
        println!("    {}", record.body);
    }
}
