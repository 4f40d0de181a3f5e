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
use crate::common::logging::{debug, error, warn};
use crate::inventory::manifest::{InventoryFile, Manifest};
use crate::inventory::reader::InventoryReaderFactory;

struct ShardBounds {
    file: InventoryFile,
    min: String,
    max: String,
}

/// Orders the manifest's shards by `(min key, max key)` using only footer
/// statistics. Shards are assumed not to overlap; overlaps are logged, not
/// rejected.
pub fn sort_manifest(manifest: &Manifest, factory: &dyn InventoryReaderFactory) -> Result<Manifest> {
    let mut bounds = Vec::with_capacity(manifest.files.len());
    for file in &manifest.files {
        let mut reader = factory
            .open_metadata_reader(manifest, &file.key)
            .map_err(|e| InventoryError::Ordering {
                url: manifest.url.clone(),
                key: file.key.clone(),
                source: Box::new(e),
            })?;
        bounds.push(ShardBounds {
            file: file.clone(),
            min: reader.min_value().to_string(),
            max: reader.max_value().to_string(),
        });
        if let Err(e) = reader.close() {
            error!("failed to close inventory file. file={}, err={}", file.key, e);
        }
    }

    // Stable, so shards with equal bounds keep manifest order.
    bounds.sort_by(|a, b| (&a.min, &a.max).cmp(&(&b.min, &b.max)));

    for pair in bounds.windows(2) {
        if pair[0].max > pair[1].min {
            warn!(
                "inventory files overlap: {} max={} > {} min={}",
                pair[0].file.key, pair[0].max, pair[1].file.key, pair[1].min
            );
        }
    }
    debug!(
        "sorted {} inventory files of manifest {}",
        bounds.len(),
        manifest.url
    );
    Ok(manifest.with_files(bounds.into_iter().map(|b| b.file).collect()))
}
