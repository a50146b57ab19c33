mod api;
mod db;
mod error;
mod filter;
mod models;
mod schema;
mod seed;
mod selector;
mod test_store;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use db::{Database, DEFAULT_POOL_SIZE};
use models::{JsonOutput, Level};
use seed::SeedOptions;

const DEFAULT_DB_NAME: &str = "kotoba.db";
const DEFAULT_BIND: &str = "127.0.0.1:8081";

#[derive(Parser)]
#[command(name = "kotoba")]
#[command(about = "Generate and serve randomized vocabulary tests from a question bank")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Path to the SQLite question store (defaults to $KOTOBA_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing tables and columns
    Init,

    /// Import a numbered vocabulary list and generate questions
    Seed {
        /// File with lines like "1. 漢字, かんじ, meaning"
        file: PathBuf,

        /// Level tag for every generated question (n5..n1)
        #[arg(long, short)]
        level: Option<String>,

        /// Number of entries per chapter
        #[arg(long, short)]
        chapter_size: Option<i64>,

        /// Seed for reproducible distractor sampling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run the HTTP service
    Serve {
        /// Address to listen on (defaults to $KOTOBA_BIND or 127.0.0.1:8081)
        #[arg(long, short)]
        bind: Option<String>,

        /// Maximum pooled database connections
        #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
        pool_size: u32,
    },

    /// Show question counts by level and chapter
    Stats,

    /// Print a stored test
    Show {
        /// Test ID
        id: i64,
    },
}

fn get_db_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("KOTOBA_DB") {
        return PathBuf::from(path);
    }

    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kotoba");

    std::fs::create_dir_all(&config_dir).ok();
    config_dir.join(DEFAULT_DB_NAME)
}

fn get_bind_addr(flag: Option<String>) -> Result<SocketAddr, std::net::AddrParseError> {
    flag.or_else(|| std::env::var("KOTOBA_BIND").ok())
        .unwrap_or_else(|| DEFAULT_BIND.to_string())
        .parse()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kotoba=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = get_db_path(cli.db.clone());

    match cli.command {
        Commands::Init => {
            let db = Database::open(&db_path, 1)?;
            db.init()?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Seed {
            file,
            level,
            chapter_size,
            seed,
        } => {
            let level = match level {
                Some(tag) => Some(Level::from_tag(&tag).ok_or_else(|| {
                    format!("Invalid level '{}'. Use one of: n5, n4, n3, n2, n1", tag)
                })?),
                None => None,
            };
            let db = Database::open(&db_path, 1)?;
            let report = seed::seed_file(
                &db,
                &file,
                &SeedOptions {
                    level,
                    chapter_size,
                    rng_seed: seed,
                },
            )?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&report))?);
            } else {
                println!(
                    "Imported {} entries and {} questions ({} skipped for lack of distractors).",
                    report.entries, report.questions, report.skipped
                );
            }
        }

        Commands::Serve { bind, pool_size } => {
            let addr = get_bind_addr(bind)?;
            let db = Database::open(&db_path, pool_size)?;
            // Refuse to start against a store without base tables
            db.ensure_schema()?;
            tracing::info!(db = %db_path.display(), "schema ready");

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(api::serve(db, addr))?;
        }

        Commands::Stats => {
            let db = Database::open(&db_path, 1)?;
            let stats = db.get_stats()?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&stats))?);
            } else {
                println!("=== Question Bank ===");
                println!("Entries: {}", stats.total_entries);
                println!("Questions: {}", stats.total_questions);
                println!("Tests generated: {}", stats.total_tests);
                println!();
                println!("{:<10} QUESTIONS", "LEVEL");
                for bucket in &stats.by_level {
                    let label = match bucket.key {
                        Some(id) => Level::from_id(id)
                            .map(|l| l.tag().to_string())
                            .unwrap_or_else(|| id.to_string()),
                        None => "-".to_string(),
                    };
                    println!("{:<10} {}", label, bucket.count);
                }
                println!();
                println!("{:<10} QUESTIONS", "CHAPTER");
                for bucket in &stats.by_chapter {
                    let label = bucket
                        .key
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{:<10} {}", label, bucket.count);
                }
            }
        }

        Commands::Show { id } => {
            let db = Database::open(&db_path, 1)?;
            match db.get_test(id) {
                Ok(test) => {
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::ok(&test))?);
                    } else {
                        println!("{} (ID: {})", test.title, test.id);
                        println!("Created: {}", test.created_at);
                        println!("Questions: {}", test.question_count());
                        for (n, q) in test.questions.iter().enumerate() {
                            println!();
                            println!("{:>3}. {}", n + 1, truncate(&q.prompt, 60));
                            for (i, option) in q.options.iter().enumerate() {
                                let marker = if i == q.correct_index { "*" } else { " " };
                                println!("     {} {}) {}", marker, i + 1, truncate(option, 56));
                            }
                        }
                    }
                }
                Err(error::Error::NotFound(_)) if cli.json => {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::<()>::err("Test not found"))?
                    );
                }
                Err(error::Error::NotFound(_)) => println!("Test not found."),
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

// Counts characters, not bytes; prompts are mostly Japanese
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    mod truncate_tests {
        use super::*;

        #[test]
        fn truncate_short_string() {
            assert_eq!(truncate("hello", 10), "hello");
        }

        #[test]
        fn truncate_exact_length() {
            assert_eq!(truncate("hello", 5), "hello");
        }

        #[test]
        fn truncate_long_string() {
            assert_eq!(truncate("hello world", 8), "hello...");
        }

        #[test]
        fn truncate_multibyte_on_char_boundary() {
            assert_eq!(truncate("ありがとうございます", 6), "ありが...");
        }
    }

    mod config_tests {
        use super::*;

        #[test]
        fn db_flag_wins() {
            let path = get_db_path(Some(PathBuf::from("/tmp/explicit.db")));
            assert_eq!(path, PathBuf::from("/tmp/explicit.db"));
        }

        #[test]
        fn bind_flag_is_parsed() {
            let addr = get_bind_addr(Some("0.0.0.0:9000".to_string())).unwrap();
            assert_eq!(addr.port(), 9000);
        }

        #[test]
        fn bad_bind_is_rejected() {
            assert!(get_bind_addr(Some("not an address".to_string())).is_err());
        }
    }

    mod cli_parsing_tests {
        use super::*;

        #[test]
        fn parse_init_command() {
            let cli = Cli::try_parse_from(["kotoba", "init"]).unwrap();
            assert!(!cli.json);
            assert!(cli.db.is_none());
            assert!(matches!(cli.command, Commands::Init));
        }

        #[test]
        fn parse_global_flags_after_subcommand() {
            let cli = Cli::try_parse_from(["kotoba", "stats", "--json", "--db", "bank.db"]).unwrap();
            assert!(cli.json);
            assert_eq!(cli.db, Some(PathBuf::from("bank.db")));
            assert!(matches!(cli.command, Commands::Stats));
        }

        #[test]
        fn parse_seed_with_options() {
            let cli = Cli::try_parse_from([
                "kotoba",
                "seed",
                "n3.txt",
                "--level",
                "n3",
                "--chapter-size",
                "50",
                "--seed",
                "7",
            ])
            .unwrap();
            match cli.command {
                Commands::Seed {
                    file,
                    level,
                    chapter_size,
                    seed,
                } => {
                    assert_eq!(file, PathBuf::from("n3.txt"));
                    assert_eq!(level, Some("n3".to_string()));
                    assert_eq!(chapter_size, Some(50));
                    assert_eq!(seed, Some(7));
                }
                _ => panic!("Expected Seed command"),
            }
        }

        #[test]
        fn parse_serve_defaults() {
            let cli = Cli::try_parse_from(["kotoba", "serve"]).unwrap();
            match cli.command {
                Commands::Serve { bind, pool_size } => {
                    assert!(bind.is_none());
                    assert_eq!(pool_size, DEFAULT_POOL_SIZE);
                }
                _ => panic!("Expected Serve command"),
            }
        }

        #[test]
        fn parse_show_requires_id() {
            assert!(Cli::try_parse_from(["kotoba", "show"]).is_err());
            let cli = Cli::try_parse_from(["kotoba", "show", "12"]).unwrap();
            assert!(matches!(cli.command, Commands::Show { id: 12 }));
        }
    }
}
