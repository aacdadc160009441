//! Command-line access to a docstore file.
//!
//! Usage:
//!   docstore <db_path> set <key> <value>
//!   docstore <db_path> get <key>
//!   docstore <db_path> delete <key>
//!   docstore <db_path> scan [start]
//!   docstore <db_path> stats
//!   docstore <db_path> check
//!   docstore <db_path> bulk_insert <count>
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use docstore::{Config, Db, Storage, StoreError};
use std::env;
use std::process::exit;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

fn usage() -> ! {
    eprintln!("Usage: docstore <db_path> <command> [args...]");
    eprintln!("Commands:");
    eprintln!("  set <key> <value>   - Insert or update a key-value pair");
    eprintln!("  get <key>           - Get value for a key");
    eprintln!("  delete <key>        - Delete a key");
    eprintln!("  scan [start]        - List entries from start (or the beginning)");
    eprintln!("  stats               - Show database statistics as JSON");
    eprintln!("  check               - Verify the file and report page usage as JSON");
    eprintln!("  bulk_insert <count> - Insert count test records in one transaction");
    eprintln!("Environment:");
    eprintln!("  DOCSTORE_LOCK_TIMEOUT  seconds to wait for the file lock (default 3600)");
    exit(1);
}

fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("ERROR: {}", err);
    exit(1);
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

fn arg<'a>(args: &'a [String], index: usize) -> &'a [u8] {
    match args.get(index) {
        Some(arg) => arg.as_bytes(),
        None => usage(),
    }
}

fn main() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage();
    }

    let mut config = Config::new(&args[1]);
    if let Ok(secs) = env::var("DOCSTORE_LOCK_TIMEOUT") {
        match secs.parse() {
            Ok(secs) => config = config.lock_timeout(Duration::from_secs(secs)),
            Err(_) => fail("DOCSTORE_LOCK_TIMEOUT must be a number of seconds"),
        }
    }

    let store = Storage::open_with(config).unwrap_or_else(|e| fail(e));

    match args[2].as_str() {
        "set" => {
            store
                .set(arg(&args, 3), arg(&args, 4))
                .unwrap_or_else(|e| fail(e));
            println!("OK");
        }

        "get" => match store.get(arg(&args, 3)) {
            Ok(Some(value)) => match String::from_utf8(value) {
                Ok(s) => println!("{}", s),
                Err(_) => println!("<binary data>"),
            },
            Ok(None) => println!("NOT_FOUND"),
            Err(e) => fail(e),
        },

        "delete" => {
            store.delete(arg(&args, 3)).unwrap_or_else(|e| fail(e));
            println!("OK");
        }

        "scan" => scan(store.db(), args.get(3).map(|s| s.as_bytes())),

        "stats" => print_json(&store.stats().unwrap_or_else(|e| fail(e))),

        "check" => print_json(&store.db().check().unwrap_or_else(|e| fail(e))),

        "bulk_insert" => {
            let count: usize = match args.get(3).map(|s| s.parse()) {
                Some(Ok(n)) => n,
                _ => fail("Invalid count"),
            };

            let start = std::time::Instant::now();
            let result = store.db().update(|txn| {
                for i in 0..count {
                    let key = format!("key_{:08}", i);
                    let value = format!("value_{}", i);
                    txn.put(key.as_bytes(), value.as_bytes())?;
                }
                Ok(())
            });
            if let Err(e) = result {
                fail(StoreError::Write(e));
            }

            let elapsed = start.elapsed();
            println!("Inserted {} records in {:?}", count, elapsed);
            if count > 0 {
                println!("Rate: {:.0} ops/sec", count as f64 / elapsed.as_secs_f64());
            }
        }

        _ => usage(),
    }

    store.close().unwrap_or_else(|e| fail(e));
}

fn scan(db: &Db, start: Option<&[u8]>) {
    let txn = db.begin_read().unwrap_or_else(|e| fail(e));
    let cursor = match start {
        Some(start) => txn.seek(start),
        None => txn.iter(),
    };

    let mut count = 0;
    for entry in cursor {
        let (key, value) = entry.unwrap_or_else(|e| fail(e));
        println!(
            "{} -> {}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        );
        count += 1;
    }
    println!("COUNT: {}", count);
}
