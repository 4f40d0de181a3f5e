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
//! Inventory facade: load a manifest, optionally order its shards, and hand
//! out independent iterators over the listed objects.

use std::sync::Arc;

use crate::common::config;
use crate::common::error::Result;
use crate::common::logging::{info, warn};
use crate::fs::opendal::ObjectStore;

pub mod iterator;
pub mod manifest;
pub mod reader;
pub mod sort;

#[cfg(test)]
pub(crate) mod testing;

pub use iterator::{CancellationToken, InventoryIterator};
pub use manifest::{InventoryFile, Manifest, load_manifest};
pub use reader::{InventoryReaderFactory, ObjectStoreReaderFactory};
pub use sort::sort_manifest;

const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InventoryOptions {
    /// Order shards by key boundaries before iterating.
    pub sort: bool,
    /// Keep manifest order when ordering fails instead of failing the load.
    pub tolerate_sort_failure: bool,
    pub batch_size: usize,
}

impl Default for InventoryOptions {
    fn default() -> Self {
        Self {
            sort: true,
            tolerate_sort_failure: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl InventoryOptions {
    /// Options from the `[inventory]` section of the loaded config.
    pub fn from_config() -> Self {
        Self {
            sort: config::inventory_sort_files(),
            tolerate_sort_failure: config::inventory_tolerate_sort_failure(),
            batch_size: config::inventory_batch_size(),
        }
    }
}

/// A loaded inventory. Cheap to share; every iterator owns its own cursor
/// and readers.
#[derive(Clone)]
pub struct Inventory {
    manifest: Arc<Manifest>,
    factory: Arc<dyn InventoryReaderFactory>,
    batch_size: usize,
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory")
            .field("url", &self.manifest.url)
            .field("files", &self.manifest.files.len())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Loads the manifest at `manifest_url` and reads shards through `store`.
pub fn generate_inventory(
    manifest_url: &str,
    store: &ObjectStore,
    options: InventoryOptions,
) -> Result<Inventory> {
    let manifest = load_manifest(manifest_url, store)?;
    let factory = Arc::new(ObjectStoreReaderFactory::new(
        store.clone(),
        options.batch_size,
    ));
    Inventory::new(manifest, factory, options)
}

impl Inventory {
    pub fn new(
        manifest: Manifest,
        factory: Arc<dyn InventoryReaderFactory>,
        options: InventoryOptions,
    ) -> Result<Self> {
        let manifest = if options.sort {
            match sort_manifest(&manifest, factory.as_ref()) {
                Ok(sorted) => sorted,
                Err(e) if options.tolerate_sort_failure => {
                    warn!("keeping manifest order of {}: {}", manifest.url, e);
                    manifest
                }
                Err(e) => return Err(e),
            }
        } else {
            manifest
        };
        info!(
            "inventory ready: url={} source={} format={} files={} sorted={}",
            manifest.url,
            manifest.source_bucket,
            manifest.format,
            manifest.files.len(),
            options.sort
        );
        Ok(Self {
            manifest: Arc::new(manifest),
            factory,
            batch_size: options.batch_size.max(1),
        })
    }

    pub fn iterator(&self) -> InventoryIterator {
        self.iterator_with_cancel(CancellationToken::new())
    }

    pub fn iterator_with_cancel(&self, cancel: CancellationToken) -> InventoryIterator {
        InventoryIterator::new(
            Arc::clone(&self.manifest),
            Arc::clone(&self.factory),
            cancel,
            self.batch_size,
        )
    }

    /// Name of the bucket the inventory describes.
    pub fn source_name(&self) -> &str {
        &self.manifest.source_bucket
    }

    pub fn inventory_url(&self) -> &str {
        &self.manifest.url
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}
