use std::{env, process};

use rsqlite_dissect::diagnostics::LogSink;
use rsqlite_dissect::{self as dissect, DissectOptions};

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <file> <command> [name]", args[0]);
        eprintln!("Commands: .dbinfo | .tables | .indexes | .dump <name> | .history <name>");
        process::exit(1);
    }

    let (file_path, command) = (&args[1], args[2].as_str());
    let sink = LogSink;
    let options = DissectOptions::default();

    let database = dissect::open_database(file_path, &options, &sink).unwrap_or_else(|err| {
        eprintln!("failed to open {file_path}: {err}");
        process::exit(1);
    });

    let wal_path = format!("{file_path}-wal");
    let wal =
        std::fs::metadata(&wal_path).ok().and_then(|_| dissect::open_wal(&wal_path, &options, &sink).ok());

    let history = dissect::build_history(database, wal, &options, &sink).unwrap_or_else(|err| {
        eprintln!("failed to build version history: {err}");
        process::exit(1);
    });
    let base = history.versions.first().expect("a version history always has at least the base version");

    match command {
        ".dbinfo" => println!("{}", base.header()),
        ".tables" => report(dissect::list_tables(base, &options, &sink), |names| {
            names.iter().for_each(|n| println!("{n}"));
        }),
        ".indexes" => report(dissect::list_indexes(base, &options, &sink), |names| {
            names.iter().for_each(|n| println!("{n}"));
        }),
        ".dump" => {
            let name = args.get(3).unwrap_or_else(|| {
                eprintln!(".dump requires a table or index name");
                process::exit(1);
            });
            report(dissect::snapshot_table(base, name, &options, &sink), |cells| {
                cells.iter().for_each(|c| println!("{c:?}"));
            });
        }
        ".history" => {
            let name = args.get(3).unwrap_or_else(|| {
                eprintln!(".history requires a table or index name");
                process::exit(1);
            });
            let parser = dissect::iter_history(&history, name, None, &options, &sink).unwrap_or_else(|err| {
                eprintln!("{err}");
                process::exit(1);
            });
            for commit in parser {
                match commit {
                    Ok(c) => println!("{c}"),
                    Err(err) => {
                        eprintln!("{err}");
                        process::exit(1);
                    }
                }
            }
        }
        other => {
            eprintln!("unknown command: {other}");
            process::exit(1);
        }
    }
}

fn report<T>(result: rsqlite_dissect::Result<T>, on_ok: impl FnOnce(T)) {
    match result {
        Ok(value) => on_ok(value),
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}
