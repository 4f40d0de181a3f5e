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
//! In-memory shard readers for exercising ordering and iteration without files.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::common::error::{InventoryError, Result, ShardStage};
use crate::formats::{InventoryFileReader, InventoryFormat, InventoryMetadataReader, InventoryObject};
use crate::inventory::manifest::{InventoryFile, Manifest};
use crate::inventory::reader::InventoryReaderFactory;

pub(crate) const SOURCE_BUCKET: &str = "example-source-bucket";

#[derive(Clone, Default)]
pub(crate) struct FakeShard {
    pub keys: Vec<String>,
    /// Row at which `read_batch` starts failing.
    pub fail_read_at: Option<usize>,
}

impl FakeShard {
    pub fn of(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            fail_read_at: None,
        }
    }

    pub fn numbered(prefix: &str, rows: usize) -> Self {
        Self {
            keys: (0..rows).map(|i| format!("{prefix}{i:06}")).collect(),
            fail_read_at: None,
        }
    }
}

#[derive(Default)]
struct Ledger {
    metadata_opens: Vec<String>,
    file_opens: Vec<String>,
    closes: HashMap<String, usize>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeFactory {
    shards: HashMap<String, FakeShard>,
    // Every row decode fails; boundaries stay readable.
    decode_always_fails: bool,
    ledger: Arc<Mutex<Ledger>>,
}

impl FakeFactory {
    pub fn with_shard(mut self, key: &str, shard: FakeShard) -> Self {
        self.shards.insert(key.to_string(), shard);
        self
    }

    pub fn failing_decode(mut self) -> Self {
        self.decode_always_fails = true;
        self
    }

    pub fn manifest(&self, keys: &[&str]) -> Manifest {
        Manifest {
            url: "s3://inventory-bucket/manifest.json".to_string(),
            inventory_bucket_arn: "arn:aws:s3:::inventory-bucket".to_string(),
            inventory_bucket: "inventory-bucket".to_string(),
            source_bucket: SOURCE_BUCKET.to_string(),
            format: InventoryFormat::Parquet,
            files: keys
                .iter()
                .map(|k| InventoryFile {
                    key: k.to_string(),
                    size: None,
                    md5_checksum: Some(format!("md5-{k}")),
                })
                .collect(),
        }
    }

    pub fn metadata_opens(&self) -> Vec<String> {
        self.lock().metadata_opens.clone()
    }

    pub fn file_opens(&self) -> Vec<String> {
        self.lock().file_opens.clone()
    }

    pub fn closes(&self, key: &str) -> usize {
        self.lock().closes.get(key).copied().unwrap_or(0)
    }

    pub fn total_closes(&self) -> usize {
        self.lock().closes.values().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().expect("ledger lock")
    }

    fn reader(&self, key: &str) -> Result<FakeReader> {
        let shard = self.shards.get(key).ok_or_else(|| InventoryError::Fetch {
            location: format!("s3://inventory-bucket/{key}"),
            message: "object not found".to_string(),
        })?;
        let mut fail_read_at = shard.fail_read_at;
        if self.decode_always_fails {
            fail_read_at = Some(0);
        }
        Ok(FakeReader {
            key: key.to_string(),
            keys: shard.keys.clone(),
            min: shard.keys.iter().min().cloned().unwrap_or_default(),
            max: shard.keys.iter().max().cloned().unwrap_or_default(),
            position: 0,
            fail_read_at,
            closed: false,
            ledger: Arc::clone(&self.ledger),
        })
    }
}

impl InventoryReaderFactory for FakeFactory {
    fn open_metadata_reader(
        &self,
        _manifest: &Manifest,
        key: &str,
    ) -> Result<Box<dyn InventoryMetadataReader>> {
        self.lock().metadata_opens.push(key.to_string());
        Ok(Box::new(self.reader(key)?))
    }

    fn open_file_reader(
        &self,
        _manifest: &Manifest,
        key: &str,
    ) -> Result<Box<dyn InventoryFileReader>> {
        self.lock().file_opens.push(key.to_string());
        Ok(Box::new(self.reader(key)?))
    }
}

struct FakeReader {
    key: String,
    keys: Vec<String>,
    min: String,
    max: String,
    position: usize,
    fail_read_at: Option<usize>,
    closed: bool,
    ledger: Arc<Mutex<Ledger>>,
}

impl InventoryMetadataReader for FakeReader {
    fn row_count(&self) -> u64 {
        self.keys.len() as u64
    }

    fn min_value(&self) -> &str {
        &self.min
    }

    fn max_value(&self) -> &str {
        &self.max
    }

    // Counts every call so a second close shows up in the ledger.
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        let mut ledger = self.ledger.lock().expect("ledger lock");
        *ledger.closes.entry(self.key.clone()).or_default() += 1;
        Ok(())
    }
}

impl InventoryFileReader for FakeReader {
    fn skip(&mut self, n: u64) -> Result<()> {
        let n = n as usize;
        if self.position + n > self.keys.len() {
            return Err(InventoryError::shard(&self.key, ShardStage::Skip, "past end"));
        }
        self.position += n;
        Ok(())
    }

    fn read_batch(&mut self, buf: &mut [InventoryObject]) -> Result<usize> {
        if self.closed {
            return Err(InventoryError::Closed {
                key: self.key.clone(),
            });
        }
        let mut filled = 0;
        while filled < buf.len() && self.position < self.keys.len() {
            if self.fail_read_at.is_some_and(|at| self.position >= at) {
                return Err(InventoryError::shard(
                    &self.key,
                    ShardStage::Read,
                    "corrupt page",
                ));
            }
            let slot = &mut buf[filled];
            slot.bucket = SOURCE_BUCKET.to_string();
            slot.key.clone_from(&self.keys[self.position]);
            slot.size = Some(self.position as i64);
            self.position += 1;
            filled += 1;
        }
        Ok(filled)
    }
}
