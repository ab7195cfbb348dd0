//! Dictionary shell
//!
//! Opens a dictionary over an in-memory object store and runs commands read
//! from stdin, one per line:
//!
//!   get <key>                 Look up a key
//!   get-async <key>           Look up a key, print when the result arrives
//!   set <key> <value>         Stage an upsert (opens a transaction)
//!   unset <key>               Stage a deletion
//!   inc <key> <delta>         Stage an atomic increment
//!   timestamp <secs>          Set the mtime written on commit
//!   commit | commit-async     Commit the open transaction
//!   rollback                  Discard the open transaction
//!   iter [-r] [-e] [-n] <path>...
//!   wait                      Wait for asynchronous operations
//!   quit

use anyhow::{Context, Result};
use clap::Parser;
use omap_dict::{DictSettings, Dictionary};
use omap_store::{MemoryObjectStore, MemoryStoreConfig};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod shell;

use shell::Shell;

#[derive(Parser, Debug)]
#[command(name = "dict-shell")]
#[command(about = "Interactive shell for omap dictionaries")]
struct Args {
    /// Dictionary URI, e.g. "oid=metadata:pool=mail_dictionaries"
    #[arg(short, long)]
    uri: Option<String>,

    /// Owner of the private partition
    #[arg(long, default_value = "shell")]
    user: String,

    /// Pools created in the in-memory store
    #[arg(short, long, default_value = "mail_dictionaries")]
    pool: Vec<String>,

    /// Store worker threads
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Latency added to every asynchronous store operation, in milliseconds
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    /// Wait for the atomic increment lock, in milliseconds
    #[arg(long, default_value = "30000")]
    lock_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: Level,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout only carries command output
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = args
        .pool
        .iter()
        .fold(MemoryStoreConfig::new(), |config, pool| config.pool(pool.as_str()))
        .workers(args.workers)
        .latency(Duration::from_millis(args.latency_ms));
    let store = Arc::new(MemoryObjectStore::new(config).context("starting object store")?);

    let settings =
        DictSettings::new(args.user).lock_timeout(Duration::from_millis(args.lock_timeout_ms));
    let dict = Dictionary::init(store, args.uri.as_deref(), &settings)
        .context("opening dictionary")?;
    info!(
        private = %dict.private_oid(),
        shared = %dict.shared_oid(),
        "Dictionary ready"
    );

    run(&dict)?;

    dict.deinit();
    Ok(())
}

fn run(dict: &Dictionary) -> Result<()> {
    let mut shell = Shell::new(dict);
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        match shell.run_line(&line, &mut stdout) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => writeln!(stdout, "error: {:#}", e)?,
        }
        stdout.flush()?;
    }

    if shell.in_transaction() {
        warn!("Open transaction discarded on exit");
    }
    dict.wait();
    shell.flush_async(&mut stdout)?;
    Ok(())
}
