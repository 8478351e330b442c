//! Demo CLI for the index engine.
//!
//! Builds a synthetic index over a fixed demo schema (8-byte key, one
//! 4-byte INCLUDE column) so the build pipeline, inspector, and scan engine
//! can be exercised from a shell:
//!
//!   index_cli build <path> <count>      - build an index of count rows
//!   index_cli inspect <path>            - print inspector stats as JSON
//!   index_cli scan <path> <lo> <hi>     - count rows with lo <= key <= hi

use std::env;
use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use btree_index::{
    FileBlockStore, IncludeColumn, Index, IndexBuilder, IndexOptions, KeyColumn, Schema,
    ScanBounds, ScanRequest,
};

fn demo_schema() -> Schema {
    Schema::new(
        vec![KeyColumn::fixed(8).expect("8 is a supported width")],
        vec![IncludeColumn::fixed(4).expect("4 is a supported width")],
    )
    .expect("one key and one INCLUDE column")
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: index_cli <command> <path> [args...]");
        eprintln!("Commands:");
        eprintln!("  build <path> <count>   - Build a synthetic index of count rows");
        eprintln!("  inspect <path>         - Print inspector statistics as JSON");
        eprintln!("  scan <path> <lo> <hi>  - Count rows with lo <= key <= hi");
        exit(1);
    }

    let command = &args[1];
    let path = Path::new(&args[2]);

    let result = match command.as_str() {
        "build" => {
            let count: u64 = args
                .get(3)
                .and_then(|c| c.parse().ok())
                .unwrap_or_else(|| {
                    eprintln!("Usage: index_cli build <path> <count>");
                    exit(1);
                });
            build(path, count)
        }
        "inspect" => inspect(path),
        "scan" => {
            let parse = |i: usize| -> u64 {
                args.get(i).and_then(|v| v.parse().ok()).unwrap_or_else(|| {
                    eprintln!("Usage: index_cli scan <path> <lo> <hi>");
                    exit(1);
                })
            };
            scan(path, parse(3), parse(4))
        }
        other => {
            eprintln!("Unknown command: {}", other);
            exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        exit(1);
    }
}

fn build(path: &Path, count: u64) -> btree_index::Result<()> {
    let mut builder = IndexBuilder::new(demo_schema(), IndexOptions::default());
    for k in 0..count {
        let value = (k as u32).wrapping_mul(2);
        builder.push(&k.to_be_bytes(), None, &[&value.to_le_bytes()], 0)?;
    }

    let store = Arc::new(FileBlockStore::create(path)?);
    let index = Index::create_in_file(builder, store)?;
    println!("{}", index.stats().to_json());
    Ok(())
}

fn inspect(path: &Path) -> btree_index::Result<()> {
    let store = Arc::new(FileBlockStore::open(path)?);
    let index = Index::open_file(store, demo_schema(), IndexOptions::default())?;
    println!("{}", index.stats().to_json());
    Ok(())
}

fn scan(path: &Path, lo: u64, hi: u64) -> btree_index::Result<()> {
    let store = Arc::new(FileBlockStore::open(path)?);
    let index = Index::open_file(store, demo_schema(), IndexOptions::default())?;

    let bounds = ScanBounds::range(
        Some((lo.to_be_bytes().to_vec(), true)),
        Some((hi.to_be_bytes().to_vec(), true)),
    );
    let mut cursor = index.scan(ScanRequest::forward(bounds))?;

    let mut rows = 0u64;
    let mut first = None;
    let mut last = None;
    while let Some(tuple) = cursor.next()? {
        let key = u64::from_be_bytes(tuple.key.as_slice().try_into().expect("8-byte key"));
        first.get_or_insert(key);
        last = Some(key);
        rows += 1;
    }

    match (first, last) {
        (Some(first), Some(last)) => {
            println!("{} rows, keys {} through {}", rows, first, last)
        }
        _ => println!("0 rows"),
    }
    Ok(())
}
