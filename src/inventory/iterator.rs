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
//! Merged iteration over all shards of a manifest, in manifest order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::error::{InventoryError, Result, ShardStage};
use crate::common::logging::{debug, error};
use crate::formats::{InventoryFileReader, InventoryObject};
use crate::inventory::manifest::{InventoryFile, Manifest};
use crate::inventory::reader::InventoryReaderFactory;

/// Cooperative stop signal shared between an iterator and its controller.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

enum IterState {
    NotStarted,
    Reading {
        index: usize,
        reader: Box<dyn InventoryFileReader>,
    },
    Exhausted,
}

enum Step {
    Filled(usize),
    Open(usize),
    Failed(InventoryError),
}

pub struct InventoryIterator {
    manifest: Arc<Manifest>,
    factory: Arc<dyn InventoryReaderFactory>,
    cancel: CancellationToken,
    state: IterState,
    buffer: Vec<InventoryObject>,
    batch_size: usize,
    // Records of the last batch not yet handed out by `Iterator::next`.
    pending: usize,
    cursor: usize,
}

impl InventoryIterator {
    pub fn new(
        manifest: Arc<Manifest>,
        factory: Arc<dyn InventoryReaderFactory>,
        cancel: CancellationToken,
        batch_size: usize,
    ) -> Self {
        Self {
            manifest,
            factory,
            cancel,
            state: IterState::NotStarted,
            buffer: Vec::new(),
            batch_size: batch_size.max(1),
            pending: 0,
            cursor: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, IterState::Exhausted)
    }

    /// Fills up to `hint` records, crossing shard boundaries as needed. The
    /// batch is shorter than `hint` only at the end of the inventory and empty
    /// exactly when the inventory is exhausted. The returned slice is reused by
    /// the next call.
    pub fn next_batch(&mut self, hint: usize) -> Result<&[InventoryObject]> {
        let hint = hint.max(1);
        self.pending = 0;
        self.cursor = 0;
        if self.buffer.len() < hint {
            self.buffer.resize_with(hint, InventoryObject::default);
        }

        let mut filled = 0;
        while filled < hint {
            if self.cancel.is_cancelled()
                && let Some(key) = self.next_key()
            {
                let key = key.to_string();
                debug!("inventory iteration cancelled: manifest={} shard={}", self.manifest.url, key);
                self.release(IterState::Exhausted);
                return Err(InventoryError::Cancelled { key });
            }
            let step = match &mut self.state {
                IterState::Exhausted => break,
                IterState::NotStarted => Step::Open(0),
                IterState::Reading { index, reader } => {
                    match reader.read_batch(&mut self.buffer[filled..hint]) {
                        Ok(0) => Step::Open(*index + 1),
                        Ok(n) => Step::Filled(n),
                        Err(e) => Step::Failed(e),
                    }
                }
            };
            match step {
                Step::Filled(n) => filled += n,
                Step::Open(index) => self.open_shard(index)?,
                Step::Failed(e) => {
                    let md5 = self
                        .current_file()
                        .and_then(|f| f.md5_checksum.as_deref())
                        .unwrap_or("-");
                    error!(
                        "inventory read failed: manifest={} md5={} err={}",
                        self.manifest.url, md5, e
                    );
                    self.release(IterState::Exhausted);
                    return Err(e);
                }
            }
        }
        Ok(&self.buffer[..filled])
    }

    fn current_file(&self) -> Option<&InventoryFile> {
        match &self.state {
            IterState::Reading { index, .. } => self.manifest.files.get(*index),
            _ => None,
        }
    }

    /// Shard being read, or the one a not yet started iterator opens first.
    fn next_key(&self) -> Option<&str> {
        let index = match &self.state {
            IterState::NotStarted => 0,
            IterState::Reading { index, .. } => *index,
            IterState::Exhausted => return None,
        };
        self.manifest.files.get(index).map(|f| f.key.as_str())
    }

    /// Closes the current reader, if any, and moves to `index`. Past the last
    /// shard the iterator becomes exhausted.
    fn open_shard(&mut self, index: usize) -> Result<()> {
        self.release(IterState::Exhausted);
        let Some(file) = self.manifest.files.get(index) else {
            debug!("inventory exhausted: manifest={}", self.manifest.url);
            return Ok(());
        };
        if self.cancel.is_cancelled() {
            return Err(InventoryError::Cancelled {
                key: file.key.clone(),
            });
        }
        let reader = self
            .factory
            .open_file_reader(&self.manifest, &file.key)
            .map_err(|e| match e.shard_key() {
                Some(_) => e,
                None => InventoryError::shard(&file.key, ShardStage::Open, e),
            })?;
        debug!("reading inventory file {} ({}/{})", file.key, index + 1, self.manifest.files.len());
        self.state = IterState::Reading { index, reader };
        Ok(())
    }

    fn release(&mut self, next: IterState) {
        if let IterState::Reading { index, mut reader } = std::mem::replace(&mut self.state, next)
            && let Err(e) = reader.close()
        {
            let key = self.manifest.files.get(index).map_or("", |f| f.key.as_str());
            error!("failed to close inventory file. file={}, err={}", key, e);
        }
    }
}

impl Iterator for InventoryIterator {
    type Item = Result<InventoryObject>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.pending {
            let n = match self.next_batch(self.batch_size) {
                Ok(batch) => batch.len(),
                Err(e) => return Some(Err(e)),
            };
            if n == 0 {
                return None;
            }
            self.pending = n;
        }
        let record = std::mem::take(&mut self.buffer[self.cursor]);
        self.cursor += 1;
        Some(Ok(record))
    }
}

impl Drop for InventoryIterator {
    fn drop(&mut self) {
        self.release(IterState::Exhausted);
    }
}
