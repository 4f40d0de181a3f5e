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
use std::sync::Arc;

use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder,
};
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};

use crate::common::error::{InventoryError, Result, ShardStage};
use crate::formats::{
    BatchStream, KEY_COLUMNS, ShardBoundary, ShardSource, find_column, inventory_column_positions,
};
use crate::fs::opendal::OpendalRangeReader;

/// A Parquet shard: footer metadata is loaded on open, row groups are only
/// touched once a decoder is requested.
pub struct ParquetShard {
    key: String,
    reader: OpendalRangeReader,
    metadata: Arc<ParquetMetaData>,
    boundary: ShardBoundary,
    projection: Vec<usize>,
}

impl ParquetShard {
    pub fn open(key: &str, reader: OpendalRangeReader) -> Result<Self> {
        let metadata = ParquetMetaDataReader::new()
            .parse_and_finish(&reader)
            .map_err(|e| InventoryError::shard(key, ShardStage::Metadata, e))?;
        let metadata = Arc::new(metadata);
        let boundary = key_boundary(key, &metadata)?;
        let root_names: Vec<&str> = metadata
            .file_metadata()
            .schema_descr()
            .root_schema()
            .get_fields()
            .iter()
            .map(|f| f.name())
            .collect();
        let projection = inventory_column_positions(root_names.iter().copied());
        Ok(Self {
            key: key.to_string(),
            reader,
            metadata,
            boundary,
            projection,
        })
    }
}

impl ShardSource for ParquetShard {
    fn key(&self) -> &str {
        &self.key
    }

    fn boundary(&self) -> &ShardBoundary {
        &self.boundary
    }

    fn open_batches(&self, start_row: u64, batch_size: usize) -> Result<(BatchStream, u64)> {
        let open_err = |e: parquet::errors::ParquetError| {
            InventoryError::shard(&self.key, ShardStage::Open, e)
        };
        let arrow_metadata =
            ArrowReaderMetadata::try_new(Arc::clone(&self.metadata), ArrowReaderOptions::new())
                .map_err(open_err)?;
        let mask = ProjectionMask::roots(
            self.metadata.file_metadata().schema_descr(),
            self.projection.iter().copied(),
        );
        let start = usize::try_from(start_row).map_err(|e| {
            InventoryError::shard(&self.key, ShardStage::Open, e)
        })?;
        let reader =
            ParquetRecordBatchReaderBuilder::new_with_metadata(self.reader.clone(), arrow_metadata)
                .with_projection(mask)
                .with_batch_size(batch_size)
                .with_offset(start)
                .build()
                .map_err(open_err)?;
        Ok((Box::new(reader.map(|r| r.map_err(|e| e.to_string()))), 0))
    }
}

/// Min of the row-group minimums and max of the row-group maximums of the
/// key column. Only footer statistics are consulted; a single row group
/// without them leaves the whole boundary unknown.
fn key_boundary(shard_key: &str, metadata: &ParquetMetaData) -> Result<ShardBoundary> {
    let schema = metadata.file_metadata().schema_descr();
    let leaf_names = schema.columns().iter().map(|c| {
        if c.path().parts().len() == 1 {
            c.name()
        } else {
            ""
        }
    });
    let key_leaf = find_column(leaf_names, KEY_COLUMNS).ok_or_else(|| {
        InventoryError::MissingColumn {
            key: shard_key.to_string(),
            column: KEY_COLUMNS[0].to_string(),
        }
    })?;

    let row_count = u64::try_from(metadata.file_metadata().num_rows()).unwrap_or(0);
    let mut min_key: Option<Vec<u8>> = None;
    let mut max_key: Option<Vec<u8>> = None;
    for row_group in metadata.row_groups() {
        if row_group.num_rows() == 0 {
            continue;
        }
        let stats = row_group.column(key_leaf).statistics();
        let (Some(min), Some(max)) = (
            stats.and_then(|s| s.min_bytes_opt()),
            stats.and_then(|s| s.max_bytes_opt()),
        ) else {
            return Ok(ShardBoundary {
                row_count,
                ..ShardBoundary::default()
            });
        };
        if min_key.as_deref().is_none_or(|cur| min < cur) {
            min_key = Some(min.to_vec());
        }
        if max_key.as_deref().is_none_or(|cur| max > cur) {
            max_key = Some(max.to_vec());
        }
    }

    Ok(ShardBoundary {
        row_count,
        has_statistics: true,
        min_key: min_key
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default(),
        max_key: max_key
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default(),
    })
}
