//! ciphersearch: encrypted document store with blind keyword search
//!
//! Commands:
//!   upload <doc_id> (--file PATH | --text TEXT) [--replace]
//!   search <query> [--mode exact|and|or|fuzzy] [--threshold F]
//!   delete <doc_id>
//!   clear --yes
//!   stats [--json]       - row counts and the stored salt
//!   dump [--limit N]     - raw server rows (what the server can see)
//!   audit [--json]       - server operation log (last 1024 events)
//!   config show          - display current configuration
//!
//! The master password is read from CIPHERSEARCH_PASSWORD or prompted for.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};

use cs_client::{Client, ClientSettings, SearchResponse};
use cs_core::config::CipherSearchConfig;
use cs_core::{DocId, SearchMode};
use cs_server::MatchingEngine;

const PASSWORD_ENV: &str = "CIPHERSEARCH_PASSWORD";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "ciphersearch",
    version,
    about = "Encrypted document store with blind keyword search",
    long_about = "ciphersearch: documents are encrypted client-side; the index holds only keyed tokens"
)]
struct Cli {
    /// Path to ciphersearch.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CIPHERSEARCH_CONFIG",
        default_value = "~/.config/ciphersearch/ciphersearch.toml"
    )]
    config: PathBuf,

    /// SQLite database (overrides config store.db_path)
    #[arg(long, env = "CIPHERSEARCH_DB")]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to config log.level
    #[arg(long, env = "CIPHERSEARCH_LOG")]
    log: Option<String>,

    /// Log format; defaults to config log.format
    #[arg(long, env = "CIPHERSEARCH_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt and index a document
    Upload {
        /// Unique document identifier
        doc_id: String,
        /// Read the document body from a file
        #[arg(long, short = 'f', conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,
        /// Document body given inline
        #[arg(long, short = 't')]
        text: Option<String>,
        /// Overwrite an existing document with the same id
        #[arg(long)]
        replace: bool,
    },

    /// Search and decrypt matching documents
    Search {
        /// Query terms, separated by spaces or commas
        query: String,
        #[arg(long, short = 'm', default_value = "exact")]
        mode: ModeArg,
        /// Minimum n-gram overlap for fuzzy mode, in (0, 1]
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Delete a document and its index entries
    Delete { doc_id: String },

    /// Delete every document and index entry
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Show row counts and the stored salt
    Stats {
        /// Print counts as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print raw server-side rows: ciphertext, nonces, tokens
    Dump {
        /// Maximum index rows per table
        #[arg(long, short = 'n', default_value_t = 50)]
        limit: usize,
    },

    /// Print the server operation log
    Audit {
        /// Print events as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Exact,
    And,
    Or,
    Fuzzy,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Exact => SearchMode::Exact,
            ModeArg::And => SearchMode::And,
            ModeArg::Or => SearchMode::Or,
            ModeArg::Fuzzy => SearchMode::Fuzzy,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or(if config.log.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    init_logging(&level, format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "ciphersearch starting"
    );

    if let Commands::Config { action: ConfigAction::Show } = cli.command {
        return cmd_config_show(&config, &config_path);
    }

    let db_path = expand_tilde(cli.db.as_deref().unwrap_or(config.store.db_path.as_path()));
    let engine = MatchingEngine::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;

    match cli.command {
        Commands::Upload { doc_id, file, text, replace } => {
            cmd_upload(&engine, &config, &doc_id, file.as_deref(), text, replace)
        }
        Commands::Search { query, mode, threshold } => {
            cmd_search(&engine, &config, &query, mode.into(), threshold)
        }
        Commands::Delete { doc_id } => cmd_delete(&engine, &doc_id),
        Commands::Clear { yes } => cmd_clear(&engine, yes),
        Commands::Stats { json } => cmd_stats(&engine, &db_path, json),
        Commands::Dump { limit } => cmd_dump(&engine, limit),
        Commands::Audit { json } => cmd_audit(&engine, json),
        Commands::Config { .. } => Ok(()),
    }
}

fn load_config(path: &Path) -> Result<CipherSearchConfig> {
    CipherSearchConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

/// Master password from the environment, or an interactive prompt.
fn read_password() -> Result<SecretString> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password("Master password: ")
        .with_context(|| format!("reading master password (or set {PASSWORD_ENV})"))?;
    Ok(SecretString::from(pw))
}

fn login<'a>(
    engine: &'a MatchingEngine,
    config: &CipherSearchConfig,
) -> Result<Client<&'a MatchingEngine>> {
    let mut client = Client::new(engine, ClientSettings::from(config));
    let password = read_password()?;
    client.login(&password).context("login failed")?;
    Ok(client)
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_upload(
    engine: &MatchingEngine,
    config: &CipherSearchConfig,
    doc_id: &str,
    file: Option<&Path>,
    text: Option<String>,
    replace: bool,
) -> Result<()> {
    let doc_id = DocId::new(doc_id)?;
    let body = match (file, text) {
        (Some(path), _) => std::fs::read(path)
            .with_context(|| format!("reading document: {}", path.display()))?,
        (None, Some(text)) => text.into_bytes(),
        (None, None) => anyhow::bail!("either --file or --text is required"),
    };

    let client = login(engine, config)?;
    let receipt = client.upload(&doc_id, &body, replace)?;

    println!("Uploaded {}", receipt.doc_id);
    println!("  keywords:     {}", receipt.keyword_count);
    println!("  ngram tokens: {}", receipt.ngram_tokens);
    println!("  ciphertext:   {}", fmt_bytes(receipt.ciphertext_len as u64));
    Ok(())
}

fn cmd_search(
    engine: &MatchingEngine,
    config: &CipherSearchConfig,
    query: &str,
    mode: SearchMode,
    threshold: Option<f64>,
) -> Result<()> {
    let client = login(engine, config)?;
    let response = client.search(query, mode, threshold)?;
    print_search(&response, mode);
    Ok(())
}

fn print_search(response: &SearchResponse, mode: SearchMode) {
    println!("{} result(s) [{mode}]", response.documents.len());
    for doc in &response.documents {
        println!();
        match doc.score {
            Some(score) => println!("── {} (score {:.2})", doc.doc_id, score),
            None => println!("── {}", doc.doc_id),
        }
        println!("{}", doc.text());
    }

    if !response.tampered.is_empty() {
        println!();
        println!("WARNING: {} document(s) failed integrity verification:", response.tampered.len());
        for id in &response.tampered {
            println!("  {id}");
        }
        if response.wrong_key_suspected() {
            println!("No returned document decrypted; the master password is probably wrong.");
        }
    }
}

fn cmd_delete(engine: &MatchingEngine, doc_id: &str) -> Result<()> {
    let doc_id = DocId::new(doc_id)?;
    if engine.delete(&doc_id)? {
        println!("Deleted {doc_id}");
    } else {
        println!("No document {doc_id}");
    }
    Ok(())
}

fn cmd_clear(engine: &MatchingEngine, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("refusing to clear without --yes");
    }
    engine.clear()?;
    println!("All documents and index entries removed");
    Ok(())
}

fn cmd_stats(engine: &MatchingEngine, db_path: &Path, json: bool) -> Result<()> {
    let stats = engine.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("Database: {}", db_path.display());
    println!("  documents:      {}", stats.documents);
    println!("  index entries:  {}", stats.index_entries);
    println!("  unique tokens:  {}", stats.unique_tokens);
    println!("  ngram entries:  {}", stats.ngram_entries);
    println!("  audit events:   {}", stats.audit_events);

    match engine.profile()? {
        Some(profile) => {
            let salt = cs_crypto::Salt::from_slice(&profile.salt)
                .map(|s| s.to_base64())
                .unwrap_or_else(|| format!("<malformed, {} bytes>", profile.salt.len()));
            println!("  salt:           {salt}");
            println!(
                "  verifier:       {}",
                if profile.verifier.is_some() { "recorded" } else { "none" }
            );
        }
        None => println!("  salt:           none (no login yet)"),
    }
    Ok(())
}

fn cmd_dump(engine: &MatchingEngine, limit: usize) -> Result<()> {
    println!("# documents");
    for doc in engine.dump_documents()? {
        println!(
            "{}  keywords={}  created={}  nonce={}  ciphertext={} ({})",
            doc.doc_id,
            doc.keyword_count,
            doc.created_at,
            STANDARD.encode(&doc.nonce),
            preview(&doc.encrypted_content),
            fmt_bytes(doc.encrypted_content.len() as u64),
        );
    }

    println!();
    println!("# search_index (first {limit})");
    for row in engine.dump_search_index(limit)? {
        println!("{}  {}", row.token, row.doc_id);
    }

    println!();
    println!("# ngram_index (first {limit})");
    for row in engine.dump_ngram_index(limit)? {
        println!("{}  {}  group={:?}", row.token, row.doc_id, row.source_keyword_hash);
    }
    Ok(())
}

fn cmd_audit(engine: &MatchingEngine, json: bool) -> Result<()> {
    let events = engine.audit_events()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    if events.is_empty() {
        println!("No audit events recorded");
    }
    for event in events {
        let doc = event.doc_id.as_ref().map(DocId::as_str).unwrap_or("-");
        println!("{}  {:<16} {:<12} {}", event.timestamp, event.action, doc, event.detail);
    }
    Ok(())
}

fn cmd_config_show(config: &CipherSearchConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Formatting ────────────────────────────────────────────────────────────────

/// First bytes of a blob in base64, for eyeballing that it is not plaintext.
fn preview(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(24)];
    let mut s = STANDARD.encode(head);
    if bytes.len() > head.len() {
        s.push('…');
    }
    s
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search_fuzzy() {
        let cli = Cli::try_parse_from([
            "ciphersearch",
            "search",
            "diabtes",
            "--mode",
            "fuzzy",
            "--threshold",
            "0.8",
        ])
        .unwrap();
        match cli.command {
            Commands::Search { query, mode, threshold } => {
                assert_eq!(query, "diabtes");
                assert_eq!(SearchMode::from(mode), SearchMode::Fuzzy);
                assert_eq!(threshold, Some(0.8));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_upload_requires_a_body() {
        assert!(Cli::try_parse_from(["ciphersearch", "upload", "MR-001"]).is_err());
        assert!(Cli::try_parse_from([
            "ciphersearch", "upload", "MR-001", "--file", "a.txt", "--text", "b"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["ciphersearch", "upload", "MR-001", "--text", "b"]).is_ok());
    }

    #[test]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(
            expand_tilde(Path::new("~/data/cs.db")),
            PathBuf::from(home).join("data/cs.db")
        );
        assert_eq!(expand_tilde(Path::new("/tmp/cs.db")), PathBuf::from("/tmp/cs.db"));
    }

    #[test]
    fn test_load_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.search.ngram_size, 3);
    }

    #[test]
    fn test_fmt_bytes_and_preview() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert!(preview(&[0u8; 100]).ends_with('…'));
        assert!(!preview(&[0u8; 3]).ends_with('…'));
    }
}
