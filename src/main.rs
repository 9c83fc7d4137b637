//! Runnable CLI harness wired to the in-memory reference connector. A real
//! deployment supplies its own `SourceConnector` (a binlog reader, for
//! instance) and embeds `Engine` directly; this binary exists so the crate
//! is runnable end to end without one.

use std::collections::HashMap;
use std::path::PathBuf;

use log::info;

use cdc_engine::connector::reference::InMemoryConnector;
use cdc_engine::{Engine, EngineConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let mut overrides: HashMap<String, String> = HashMap::new();
    let mut offset_dir = PathBuf::from(".");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--name" => {
                if i + 1 < args.len() {
                    overrides.insert("name".to_string(), args[i + 1].clone());
                    i += 1;
                }
            }
            "--data-dir" | "-d" => {
                if i + 1 < args.len() {
                    offset_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--flush-interval-ms" => {
                if i + 1 < args.len() {
                    overrides.insert("offset.flush.interval.ms".to_string(), args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("cdc-engine - runs a single capture task to completion");
                println!();
                println!("Usage: cdc-engine [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --data-dir DIR          Directory for offset/history files (default: .)");
                println!("      --name NAME             Engine instance name");
                println!("      --flush-interval-ms MS  Offset flush interval in milliseconds");
                println!("  -h, --help                  Show this help");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    std::fs::create_dir_all(&offset_dir)?;
    overrides
        .entry("offset.storage.file.filename".to_string())
        .or_insert_with(|| offset_dir.join("offsets.json").display().to_string());
    overrides
        .entry("ddl.history.file.filename".to_string())
        .or_insert_with(|| offset_dir.join("ddl-history.bin").display().to_string());

    let config = EngineConfig::from_map(&overrides)?;
    info!("starting engine '{}'", config.name);

    let connector = InMemoryConnector::new(vec![]);
    let engine = Engine::new(
        config,
        Box::new(connector),
        Box::new(|success, message, _err| {
            if success {
                info!("engine completed: {message}");
            } else {
                log::error!("engine failed: {message}");
            }
        }),
    )?;

    let consumer_engine: &Engine = &engine;
    std::thread::scope(|scope| {
        scope.spawn(|| {
            consumer_engine.consume_forever(|record| {
                info!("captured record on topic '{}'", record.topic);
            });
        });
        engine.run().expect("engine run failed");
    });

    Ok(())
}
