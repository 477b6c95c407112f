use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use recmaster_rs::model::{Feedback, Item, User};
use recmaster_rs::storage::DataStore;
use recmaster_rs::{Config, Master, MemoryCacheStore, MemoryDataStore, TaskRecord};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

#[derive(Debug, Default, Deserialize)]
struct DataFile {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default)]
    feedback: Vec<Feedback>,
}

#[derive(Debug, Serialize)]
struct Report {
    tasks: Vec<TaskRecord>,
    stats: recmaster_rs::Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config_path = parse_arg("--config").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let data: DataFile = match parse_arg("--data") {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => DataFile::default(),
    };

    let store = MemoryDataStore::new();
    store.batch_insert_users(&data.users)?;
    store.batch_insert_items(&data.items)?;
    store.batch_insert_feedback(&data.feedback, true, true, true)?;

    let master = Master::new(config, Arc::new(store), Arc::new(MemoryCacheStore::new()))?;
    master.load_dataset()?;
    master.run_find_item_neighbors()?;
    master.run_find_user_neighbors()?;

    let report = Report {
        tasks: master.tasks(),
        stats: master.stats()?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
