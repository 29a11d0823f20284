use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use docchat_kernel::config::AppConfig;
use docchat_kernel::log::{Fields, InteractionLog, LogStore};
use docchat_kernel::rag::GeminiFactory;
use docchat_kernel::session::{ProcessOutcome, QueryOutcome, Session, Upload};

/// Ask questions about your documents
#[derive(Parser, Debug)]
#[command(name = "docchat", version)]
#[command(about = "Question answering over PDF documents", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Interaction log file (overrides config)
    #[arg(long, global = true)]
    log_path: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load documents and answer questions from stdin
    Chat {
        #[command(flatten)]
        docs: DocArgs,
    },

    /// Load documents and answer a single question
    Ask {
        #[command(flatten)]
        docs: DocArgs,

        question: String,
    },

    /// Print the interaction log
    History {
        /// Print the raw store as JSON
        #[arg(long)]
        json: bool,
    },

    /// Append an entry to the interaction log
    Record {
        /// Fields as KEY=VALUE; values that parse as JSON are stored as JSON
        #[arg(required = true, value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
}

#[derive(clap::Args, Debug)]
struct DocArgs {
    /// PDF or text files to load
    #[arg(short, long, required = true, num_args = 1..)]
    docs: Vec<PathBuf>,

    /// Gemini API key (falls back to the configured environment variable)
    #[arg(long)]
    api_key: Option<String>,

    /// Chunk size in characters (overrides config)
    #[arg(long)]
    chunk_size: Option<usize>,
}

/// Summary of the interaction log for `history`.
#[derive(Debug, Serialize)]
struct HistoryOutput<'a> {
    path: &'a Path,
    entries: usize,
    last_updated: Option<&'a str>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ----------------------------
    // Configuration
    // ----------------------------
    let mut config = match resolve_config_path(cli.config.as_deref()) {
        Some(path) if cli.config.is_some() => AppConfig::load(&path)?,
        Some(path) => AppConfig::load_or_default(&path),
        None => AppConfig::default(),
    };
    if let Some(path) = cli.log_path {
        config.storage.log_path = path;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging.level);

    let log = InteractionLog::open(&config.storage.log_path);
    tracing::debug!(path = %config.storage.log_path.display(), "interaction log opened");

    // ----------------------------
    // Dispatch
    // ----------------------------
    match cli.command {
        Command::Chat { docs } => {
            let mut session = open_session(&mut config, docs)?;
            repl(&mut session, &log)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Ask { docs, question } => {
            let mut session = open_session(&mut config, docs)?;
            match session.process_query(&question, &log) {
                QueryOutcome::Answered { answer, .. } => {
                    println!("{answer}");
                    Ok(ExitCode::SUCCESS)
                }
                other => {
                    eprintln!("{other}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::History { json } => {
            let store = log.read_all();
            if json {
                println!("{}", serde_json::to_string_pretty(&store)?);
            } else {
                print_history(&config.storage.log_path, &store)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Record { fields } => {
            let fields: Fields = fields.into_iter().collect();
            if log.append(fields) {
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("entry not recorded");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

/// `--config` flag, then `DOCCHAT_CONFIG`, then `docchat.toml` in the
/// working directory.
fn resolve_config_path(flag: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = flag {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var("DOCCHAT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from("docchat.toml");
    local.exists().then_some(local)
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn open_session(config: &mut AppConfig, docs: DocArgs) -> Result<Session> {
    if let Some(size) = docs.chunk_size {
        config.index.chunk_size = size;
    }

    let api_key = docs
        .api_key
        .or_else(|| config.models.api_key_from_env())
        .unwrap_or_default();

    let uploads = docs
        .docs
        .iter()
        .map(|path| {
            Upload::from_path(path).with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut session = Session::new(config.index.clone());
    session.set_api_key(api_key);

    let factory = GeminiFactory::new(config.models.clone());
    match session.process_documents(&uploads, &factory) {
        outcome @ ProcessOutcome::Ready { .. } => {
            eprintln!("{outcome}");
            Ok(session)
        }
        outcome => bail!("{outcome}"),
    }
}

fn repl<B: docchat_kernel::log::LogBackend>(
    session: &mut Session,
    log: &InteractionLog<B>,
) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    eprintln!("Ask a question. Commands: :history, :clear, :quit");
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        match line.trim() {
            ":quit" | ":q" => break,
            ":clear" => {
                session.clear_history();
                println!("Chat history cleared!");
            }
            ":history" => {
                for turn in session.history_newest_first() {
                    println!("You: {}\nAI: {}\n", turn.question, turn.answer);
                }
            }
            question => match session.process_query(question, log) {
                QueryOutcome::Answered { answer, .. } => println!("{answer}\n"),
                other => eprintln!("{other}"),
            },
        }
    }
    Ok(())
}

fn print_history(path: &Path, store: &LogStore) -> Result<()> {
    let summary = HistoryOutput {
        path,
        entries: store.entries.len(),
        last_updated: store.last_updated.as_deref(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    for (i, entry) in store.entries.iter().enumerate() {
        println!("\n#{} at {}", i + 1, entry.timestamp);
        for (key, value) in &entry.fields {
            match value {
                Value::String(s) => println!("  {key}: {s}"),
                other => println!("  {key}: {other}"),
            }
        }
    }
    Ok(())
}
