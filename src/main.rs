// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::env;
use std::io::{self, BufWriter, Write};
use std::process;

use bucket_inventory::common::error::InventoryError;
use bucket_inventory::common::logging::{error, info};
use bucket_inventory::{
    InventoryObject, InventoryOptions, ObjectStore, generate_inventory, inventory_config,
    inventory_logging,
};

const USAGE: &str = "Usage: inventory-dump <manifest-url> [--config <path>] [--local-root <dir>] [--no-sort] [--limit <n>]";

struct Args {
    manifest_url: String,
    config_path: Option<String>,
    local_root: Option<String>,
    sort: Option<bool>,
    limit: Option<usize>,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut manifest_url = None;
    let mut config_path = None;
    let mut local_root = None;
    let mut sort = None;
    let mut limit = None;
    let mut idx = 1usize;
    while let Some(arg) = args.get(idx) {
        match arg.as_str() {
            "--config" | "-c" => {
                idx += 1;
                config_path = Some(
                    args.get(idx)
                        .cloned()
                        .ok_or("missing value for --config/-c")?,
                );
            }
            "--local-root" => {
                idx += 1;
                local_root = Some(args.get(idx).cloned().ok_or("missing value for --local-root")?);
            }
            "--no-sort" => sort = Some(false),
            "--limit" | "-n" => {
                idx += 1;
                let raw = args.get(idx).ok_or("missing value for --limit/-n")?;
                limit = Some(
                    raw.parse::<usize>()
                        .map_err(|e| format!("invalid --limit '{raw}': {e}"))?,
                );
            }
            "--help" | "-h" => {
                eprintln!("{USAGE}");
                process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown arg: {other} (try --help)"));
            }
            other => {
                if manifest_url.is_some() {
                    return Err(format!("unexpected extra argument: {other}"));
                }
                manifest_url = Some(other.to_string());
            }
        }
        idx += 1;
    }
    Ok(Args {
        manifest_url: manifest_url.ok_or("missing manifest url")?,
        config_path,
        local_root,
        sort,
        limit,
    })
}

fn format_last_modified(secs: Option<i64>) -> String {
    secs.and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

fn write_record(out: &mut impl Write, obj: &InventoryObject) -> io::Result<()> {
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}",
        obj.bucket,
        obj.key,
        obj.size.map(|s| s.to_string()).unwrap_or_default(),
        format_last_modified(obj.last_modified),
        obj.checksum.as_deref().unwrap_or("")
    )
}

fn run(args: Args) -> Result<usize, String> {
    let cfg = match args.config_path.as_deref() {
        Some(p) => inventory_config::init_from_path(p),
        None => inventory_config::init_from_env_or_default(),
    }
    .map_err(|e| format!("load inventory config: {e:#}"))?;
    inventory_logging::init_with_level(cfg.effective_log_filter());

    let store = match (args.local_root.as_deref(), cfg.object_store.as_ref()) {
        (Some(root), _) => ObjectStore::local(root),
        (None, Some(section)) => ObjectStore::s3(section.to_object_store_config("")),
        (None, None) => {
            return Err("config has no [object_store] section and no --local-root given".to_string());
        }
    }
    .map_err(|e| format!("init object store: {e:#}"))?;

    let mut options = InventoryOptions::from_config();
    if let Some(sort) = args.sort {
        options.sort = sort;
    }
    let inventory = generate_inventory(&args.manifest_url, &store, options)
        .map_err(|e| format!("generate inventory: {e}"))?;
    info!(
        "dumping inventory of {} from {}",
        inventory.source_name(),
        inventory.inventory_url()
    );

    let limit = args.limit.unwrap_or(usize::MAX);
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut written = 0usize;
    let mut it = inventory.iterator();
    while written < limit {
        let batch = it
            .next_batch(options.batch_size.min(limit - written))
            .map_err(|e: InventoryError| format!("read inventory: {e}"))?;
        if batch.is_empty() {
            break;
        }
        for obj in batch {
            write_record(&mut out, obj).map_err(|e| format!("write stdout: {e}"))?;
        }
        written += batch.len();
    }
    out.flush().map_err(|e| format!("flush stdout: {e}"))?;
    Ok(written)
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let args = match parse_args(&args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            process::exit(2);
        }
    };
    match run(args) {
        Ok(n) => info!("dumped {} inventory records", n),
        Err(e) => {
            error!("{}", e);
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
