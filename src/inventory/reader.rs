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
use crate::common::error::{InventoryError, Result};
use crate::formats::{self, InventoryFileReader, InventoryMetadataReader};
use crate::fs::opendal::ObjectStore;
use crate::fs::path::ObjectLocation;
use crate::inventory::manifest::Manifest;

/// Opens shard readers for the files listed in a manifest.
pub trait InventoryReaderFactory: Send + Sync {
    fn open_metadata_reader(
        &self,
        manifest: &Manifest,
        key: &str,
    ) -> Result<Box<dyn InventoryMetadataReader>>;

    fn open_file_reader(&self, manifest: &Manifest, key: &str)
    -> Result<Box<dyn InventoryFileReader>>;
}

/// Reads shards from `(manifest.inventory_bucket, key)` through an [`ObjectStore`].
#[derive(Clone, Debug)]
pub struct ObjectStoreReaderFactory {
    store: ObjectStore,
    batch_size: usize,
}

impl ObjectStoreReaderFactory {
    pub fn new(store: ObjectStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    fn range_reader(
        &self,
        manifest: &Manifest,
        key: &str,
    ) -> Result<crate::fs::opendal::OpendalRangeReader> {
        let size_hint = manifest
            .files
            .iter()
            .find(|f| f.key == key)
            .and_then(|f| f.size);
        self.store
            .open_reader(&manifest.inventory_bucket, key, size_hint)
            .map_err(|e| {
                InventoryError::fetch(
                    ObjectLocation::new(&manifest.inventory_bucket, key).to_string(),
                    &e,
                )
            })
    }
}

impl InventoryReaderFactory for ObjectStoreReaderFactory {
    fn open_metadata_reader(
        &self,
        manifest: &Manifest,
        key: &str,
    ) -> Result<Box<dyn InventoryMetadataReader>> {
        let reader = self.range_reader(manifest, key)?;
        formats::open_metadata_reader(manifest.format, key, reader)
    }

    fn open_file_reader(
        &self,
        manifest: &Manifest,
        key: &str,
    ) -> Result<Box<dyn InventoryFileReader>> {
        let reader = self.range_reader(manifest, key)?;
        formats::open_file_reader(manifest.format, key, reader, self.batch_size)
    }
}
