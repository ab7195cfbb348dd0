//! Line-oriented command shell over one dictionary

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use omap_dict::{Dictionary, IterateFlags, LookupResult, TransactionContext};
use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, SystemTime};

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct Line {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum ShellCommand {
    /// Look up a key
    Get { key: String },
    /// Look up a key asynchronously
    GetAsync { key: String },
    /// Start a transaction (implicit on the first mutation)
    Begin,
    /// Stage an upsert
    Set { key: String, value: String },
    /// Stage a deletion
    Unset { key: String },
    /// Stage an atomic increment
    Inc {
        key: String,
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },
    /// Set the modification time written on commit, in seconds since the epoch
    Timestamp { secs: u64 },
    /// Commit and wait
    Commit,
    /// Commit without waiting; the result is printed when it arrives
    CommitAsync,
    /// Discard the open transaction
    Rollback,
    /// Iterate keys under paths
    Iter {
        #[arg(short, long)]
        recurse: bool,
        #[arg(short, long)]
        exact: bool,
        #[arg(short = 'n', long)]
        no_value: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Wait for asynchronous operations
    Wait,
    Quit,
}

/// Interactive session state
pub struct Shell<'d> {
    dict: &'d Dictionary,
    txn: Option<TransactionContext<'d>>,
    results_tx: Sender<String>,
    results_rx: Receiver<String>,
}

impl<'d> Shell<'d> {
    pub fn new(dict: &'d Dictionary) -> Self {
        let (results_tx, results_rx) = mpsc::channel();
        Self {
            dict,
            txn: None,
            results_tx,
            results_rx,
        }
    }

    /// Run one input line. Returns `false` once the session should end.
    pub fn run_line(&mut self, line: &str, out: &mut impl Write) -> Result<bool> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Ok(true);
        }

        let command = match Line::try_parse_from(words) {
            Ok(line) => line.command,
            Err(e) => {
                write!(out, "{}", e.render())?;
                return Ok(true);
            }
        };

        let keep_going = self.execute(command, out)?;
        self.flush_async(out)?;
        Ok(keep_going)
    }

    fn execute(&mut self, command: ShellCommand, out: &mut impl Write) -> Result<bool> {
        match command {
            ShellCommand::Get { key } => match self.dict.lookup(&key) {
                LookupResult::Found(value) => writeln!(out, "{}", value)?,
                other => writeln!(out, "{}", other.status())?,
            },
            ShellCommand::GetAsync { key } => {
                let tx = self.results_tx.clone();
                self.dict.lookup_async(&key.clone(), move |result| {
                    let line = match result {
                        LookupResult::Found(value) => format!("{} = {}", key, value),
                        other => format!("{}: {}", key, other.status()),
                    };
                    let _ = tx.send(line);
                });
            }
            ShellCommand::Begin => {
                if self.txn.is_some() {
                    bail!("transaction already open");
                }
                self.txn = Some(self.dict.transaction_init());
            }
            ShellCommand::Set { key, value } => self.transaction().set(&key, &value)?,
            ShellCommand::Unset { key } => self.transaction().unset(&key)?,
            ShellCommand::Inc { key, delta } => self.transaction().atomic_inc(&key, delta)?,
            ShellCommand::Timestamp { secs } => self
                .transaction()
                .set_timestamp(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
            ShellCommand::Commit => {
                let txn = self.txn.take().context("no open transaction")?;
                writeln!(out, "{}", txn.commit())?;
            }
            ShellCommand::CommitAsync => {
                let txn = self.txn.take().context("no open transaction")?;
                let tx = self.results_tx.clone();
                txn.commit_async(move |result| {
                    let _ = tx.send(format!("commit: {}", result));
                });
            }
            ShellCommand::Rollback => {
                self.txn
                    .take()
                    .ok_or_else(|| anyhow!("no open transaction"))?
                    .rollback();
            }
            ShellCommand::Iter {
                recurse,
                exact,
                no_value,
                paths,
            } => {
                let mut flags = IterateFlags::empty();
                if recurse {
                    flags |= IterateFlags::RECURSE;
                }
                if exact {
                    flags |= IterateFlags::EXACT_KEY;
                }
                if no_value {
                    flags |= IterateFlags::NO_VALUE;
                }

                let mut iter = self.dict.iterate_init(paths.as_slice(), flags)?;
                for entry in iter.by_ref() {
                    match entry.value {
                        Some(value) => writeln!(out, "{} = {}", entry.key, value)?,
                        None => writeln!(out, "{}", entry.key)?,
                    }
                }
                writeln!(out, "{}", iter.deinit())?;
            }
            ShellCommand::Wait => self.dict.wait(),
            ShellCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn transaction(&mut self) -> &mut TransactionContext<'d> {
        let dict = self.dict;
        self.txn.get_or_insert_with(|| dict.transaction_init())
    }

    /// Print results delivered by asynchronous callbacks so far
    pub fn flush_async(&mut self, out: &mut impl Write) -> Result<()> {
        for line in self.results_rx.try_iter() {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }

    /// Whether a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omap_dict::DictSettings;
    use omap_store::MemoryObjectStore;
    use std::sync::Arc;

    fn dict() -> Dictionary {
        let store = Arc::new(MemoryObjectStore::with_pool("mail_dictionaries").unwrap());
        Dictionary::init(store, None, &DictSettings::new("alice")).unwrap()
    }

    fn run(shell: &mut Shell<'_>, lines: &[&str]) -> String {
        let mut out = Vec::new();
        for line in lines {
            if let Err(e) = shell.run_line(line, &mut out) {
                writeln!(out, "error: {}", e).unwrap();
            }
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse() {
        let line = Line::try_parse_from(["inc", "shared/n", "-3"]).unwrap();
        assert_eq!(
            line.command,
            ShellCommand::Inc {
                key: "shared/n".to_string(),
                delta: -3
            }
        );

        let line = Line::try_parse_from(["iter", "-r", "-n", "private/", "shared/"]).unwrap();
        assert_eq!(
            line.command,
            ShellCommand::Iter {
                recurse: true,
                exact: false,
                no_value: true,
                paths: vec!["private/".to_string(), "shared/".to_string()],
            }
        );

        assert!(Line::try_parse_from(["iter"]).is_err());
        assert!(Line::try_parse_from(["frobnicate"]).is_err());
    }

    #[test]
    fn test_session() {
        let dict = dict();
        let mut shell = Shell::new(&dict);

        let output = run(
            &mut shell,
            &[
                "set shared/n 10",
                "set private/a/b x",
                "commit",
                "inc shared/n -4",
                "commit",
                "get shared/n",
                "get shared/missing",
                "iter -r private/",
            ],
        );

        assert_eq!(output, "OK\nOK\n6\nNOTFOUND\nprivate/a/b = x\nOK\n");
        assert!(!shell.in_transaction());
    }

    #[test]
    fn test_async_results_are_printed() {
        let dict = dict();
        let mut shell = Shell::new(&dict);

        run(&mut shell, &["set private/k v", "commit-async", "wait"]);
        let output = run(&mut shell, &["get-async private/k", "wait"]);

        assert_eq!(output, "private/k = v\n");
    }

    #[test]
    fn test_errors() {
        let dict = dict();
        let mut shell = Shell::new(&dict);

        let output = run(&mut shell, &["commit", "set badkey v", "rollback"]);

        assert!(output.contains("error: no open transaction"));
        assert!(output.contains("Invalid key"));
        // `set badkey` opened a transaction before failing, so rollback succeeds
        assert_eq!(output.matches("error:").count(), 2);
    }
}
