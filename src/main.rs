use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vaultdocs::{erase_all, ConfigStore, Lookup, Session, StoreConfig, VaultError};

#[derive(Parser)]
#[command(name = "vaultdocs")]
#[command(about = "Encrypted documents, one immutable entry at a time.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Profile to use (defaults to the most recent one)
    #[arg(short, long, default_value = "")]
    user: String,

    /// Sync endpoint for a new profile
    #[arg(short, long, default_value = "")]
    endpoint: String,

    /// Seconds to wait for the remote fetch before giving up
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List documents
    List {
        /// List entry names instead
        #[arg(long)]
        entries: bool,
    },
    /// Show a document or an entry
    Show {
        /// Document or entry name
        name: String,
    },
    /// Write an entry
    Put {
        document: String,
        text: String,
        /// Entry name (random when omitted)
        #[arg(short = 'n', long, default_value = "")]
        entry: String,
        /// Entry timestamp (now when omitted)
        #[arg(short, long, default_value = "")]
        timestamp: String,
    },
    /// Delete an entry, or a whole document
    Delete {
        document: String,
        /// Entry to delete; the whole document when omitted
        #[arg(short = 'n', long)]
        entry: Option<String>,
    },
    /// Dump every document as plaintext JSON
    Export { path: PathBuf },
    /// Load entries from a JSON dump
    Import { path: PathBuf },
    /// List known profiles
    Profiles,
    /// Change the sync endpoint of a profile
    Endpoint { endpoint: String },
    /// Shred every cached file and the profile list
    Clean,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config =
        StoreConfig::default_paths().with_fetch_timeout(Duration::from_secs(cli.timeout));

    match &cli.command {
        Commands::Profiles => return list_profiles(&config),
        Commands::Endpoint { endpoint } => return set_endpoint(&config, &cli.user, endpoint),
        Commands::Clean => {
            let shredded = erase_all(&config)?;
            info!("🧹 Shredded {} files", shredded);
            return Ok(());
        }
        _ => {}
    }

    let mut session = Session::new(config);
    let profile = session.init(&cli.user, &cli.endpoint)?.clone();
    info!("🚀 Working as {}", profile.username);
    unlock(&mut session, Duration::from_secs(cli.timeout)).await?;

    match &cli.command {
        Commands::List { entries: true } => {
            for name in session.entry_names()? {
                println!("{}", name);
            }
        }
        Commands::List { entries: false } => {
            for document in session.list_documents()? {
                let count = session.get_document(&document)?.len();
                println!("📁 {} ({} entries)", document, count);
            }
        }
        Commands::Show { name } => match session.lookup(name)? {
            Lookup::Document(entries) => {
                println!("📄 {}", name);
                println!("{}", "─".repeat(50));
                for entry in entries {
                    println!("{}  {}\n{}\n", entry.timestamp, entry.entry, entry.text);
                }
            }
            Lookup::Entry(entry) => {
                println!("{} / {}  {}", entry.document, entry.entry, entry.timestamp);
                println!("{}", entry.text);
            }
            Lookup::New => println!("Nothing named '{}'", name),
        },
        Commands::Put {
            document,
            text,
            entry,
            timestamp,
        } => {
            let id = session.update(text, document, entry, timestamp)?;
            println!("✅ Wrote {}", id);
        }
        Commands::Delete { document, entry } => match entry {
            Some(entry) => {
                session.delete_entry(document, entry)?;
            }
            None => {
                session.delete_document(document)?;
            }
        },
        Commands::Export { path } => {
            let count = session.export_to_file(path)?;
            println!("✅ Exported {} entries to {}", count, path.display());
        }
        Commands::Import { path } => {
            let count = session.import_from_file(path)?;
            println!("✅ Imported {} entries", count);
        }
        Commands::Profiles | Commands::Endpoint { .. } | Commands::Clean => {}
    }

    let corrupt = session.corrupt_entries().len();
    if corrupt > 0 {
        eprintln!("⚠️  {} entry files could not be read", corrupt);
    }

    let status = session.close().await?;
    println!("🔄 {}", status);
    Ok(())
}

/// Prompts until the password opens the store.
async fn unlock(session: &mut Session, limit: Duration) -> anyhow::Result<()> {
    if let Ok(password) = std::env::var("VAULTDOCS_PASSWORD") {
        session.open_within(&password, limit).await?;
        return Ok(());
    }
    loop {
        let password = read_password()?;
        match session.open_within(&password, limit).await {
            Ok(()) => return Ok(()),
            Err(VaultError::IncorrectPassword) => eprintln!("Incorrect password, try again."),
            Err(err) => return Err(err.into()),
        }
    }
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading password")?;
    if read == 0 {
        anyhow::bail!("no password given");
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn list_profiles(config: &StoreConfig) -> anyhow::Result<()> {
    let profiles = ConfigStore::new(config).profiles()?;
    println!("🔑 Profiles:");
    println!("{}", "─".repeat(50));
    for (i, profile) in profiles.iter().enumerate() {
        let marker = if i == 0 { "*" } else { " " };
        println!("{} {} - {}", marker, profile.username, profile.endpoint);
    }
    Ok(())
}

fn set_endpoint(config: &StoreConfig, user: &str, endpoint: &str) -> anyhow::Result<()> {
    let store = ConfigStore::new(config);
    let username = if user.is_empty() {
        store
            .profiles()?
            .first()
            .map(|p| p.username.clone())
            .ok_or(VaultError::MissingUsername)?
    } else {
        user.to_string()
    };
    let profile = store.set_endpoint(&username, endpoint)?;
    println!("✅ {} now syncs with {}", profile.username, profile.endpoint);
    Ok(())
}
