//! doctxn - walks through the transaction manager against the in-memory driver

use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use doctxn::document::Document;
use doctxn::driver::{DriverError, ReadConcern, TransactionOptions, WriteConcern};
use doctxn::memory::{Command, FailPoint, MemoryClient};
use doctxn::transaction::{TransactionError, TransactionManager};
use std::path::PathBuf;
use std::time::Duration;

const COLLECTION: &str = "users";

/// doctxn - session-scoped transactions over a document store
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with base transaction options; flags below override it
    #[arg(short, long)]
    options: Option<PathBuf>,

    /// Callback attempts allowed for the retried transaction
    #[arg(short, long, default_value = "1")]
    attempts: u32,

    /// Maximum time the server may spend committing, in milliseconds
    #[arg(short = 't', long)]
    max_commit_time_ms: Option<u64>,

    /// Read concern for transactions (local, majority, snapshot)
    #[arg(short, long)]
    read_concern: Option<ReadConcern>,

    /// Require majority acknowledgment for commits
    #[arg(short = 'w', long)]
    write_majority: bool,

    /// Transient insert failures injected before the retried transaction
    #[arg(short = 'f', long, default_value = "0")]
    conflict_failures: u32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn transaction_options(&self) -> Result<TransactionOptions> {
        let mut options = match &self.options {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str(&json)
                    .with_context(|| format!("Invalid transaction options in {}", path.display()))?
            }
            None => TransactionOptions::new(),
        };
        if let Some(read_concern) = self.read_concern {
            options = options.read_concern(read_concern);
        }
        if self.write_majority {
            options = options.write_concern(WriteConcern::majority());
        }
        if let Some(ms) = self.max_commit_time_ms {
            options = options.max_commit_time(Duration::from_millis(ms));
        }
        Ok(options)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let options = args.transaction_options()?;
    let client = MemoryClient::new();
    let mut manager = TransactionManager::new(client.clone());

    println!("doctxn - transaction options: {:?}", options);
    println!();

    // 1. begin, insert, commit
    manager
        .begin_transaction(&options)
        .context("Failed to begin transaction")?;
    if let Some(session) = manager.session_mut() {
        session
            .insert_one(COLLECTION, user("klinson"))
            .context("Insert inside transaction failed")?;
    }
    manager.commit().context("Failed to commit")?;
    println!("✅ Committed insert: {} document(s)", client.count(COLLECTION));

    // 2. begin, insert, rollback
    manager
        .begin_transaction(&options)
        .context("Failed to begin transaction")?;
    if let Some(session) = manager.session_mut() {
        session
            .insert_one(COLLECTION, user("rolled-back"))
            .context("Insert inside transaction failed")?;
    }
    manager.rollback(None).context("Failed to roll back")?;
    println!("↩️  Rolled back insert: {} document(s)", client.count(COLLECTION));

    // 3. retried transaction with injected transient failures
    if args.conflict_failures > 0 {
        client.fail_command(FailPoint::new(
            Command::Insert,
            args.conflict_failures,
            DriverError::write_conflict("injected write conflict"),
        ));
    }
    let mut calls = 0;
    let result = manager
        .transaction(
            |session| {
                calls += 1;
                session.insert_one(COLLECTION, user("retried"))
            },
            args.attempts,
            &options,
        )
        .context("Retried transaction failed")?;
    client.clear_fail_points();
    match result {
        Some(id) => println!(
            "🔁 Transaction committed document {} after {} callback call(s)",
            id, calls
        ),
        None => println!(
            "🛑 Transaction gave up after {} callback call(s) (attempts: {})",
            calls, args.attempts
        ),
    }

    // 4. nested begin is rejected by the driver
    manager
        .begin_transaction(&options)
        .context("Failed to begin transaction")?;
    match manager.begin_transaction(&options) {
        Err(TransactionError::NestedTransaction(err)) => {
            println!("🚫 Nested begin rejected: {}", err)
        }
        other => bail!("Expected nested transaction error, got {:?}", other),
    }
    manager.rollback(None).context("Failed to roll back")?;

    // 5. commit without a session
    match manager.commit() {
        Err(TransactionError::NoActiveSession) => println!("🚫 Commit without session rejected"),
        other => bail!("Expected no active session error, got {:?}", other),
    }

    println!();
    println!("📊 Final document count: {}", client.count(COLLECTION));

    Ok(())
}

fn user(name: &str) -> Document {
    Document::new()
        .with("name", name)
        .with("age", 20)
        .with("title", "admin")
}
