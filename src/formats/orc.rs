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
use orc_rust::arrow_reader::ArrowReaderBuilder;
use orc_rust::projection::ProjectionMask;
use orc_rust::statistics::TypeStatistics;

use crate::common::error::{InventoryError, Result, ShardStage};
use crate::formats::{
    BatchStream, KEY_COLUMNS, ShardBoundary, ShardSource, find_column, inventory_column_positions,
};
use crate::fs::opendal::OpendalRangeReader;

#[derive(Clone, Copy, Debug)]
struct StripeSpan {
    offset: u64,
    rows: u64,
}

/// An ORC shard. The file tail is parsed on open; boundaries come from the
/// file-level string statistics of the key column.
pub struct OrcShard {
    key: String,
    reader: OpendalRangeReader,
    boundary: ShardBoundary,
    column_indices: Vec<usize>,
    stripes: Vec<StripeSpan>,
}

impl OrcShard {
    pub fn open(key: &str, reader: OpendalRangeReader) -> Result<Self> {
        let builder = ArrowReaderBuilder::try_new(reader.clone())
            .map_err(|e| InventoryError::shard(key, ShardStage::Metadata, e))?;
        let meta = builder.file_metadata();
        let root = meta.root_data_type();
        let names: Vec<&str> = root.children().iter().map(|c| c.name()).collect();

        let key_pos = find_column(names.iter().copied(), KEY_COLUMNS).ok_or_else(|| {
            InventoryError::MissingColumn {
                key: key.to_string(),
                column: KEY_COLUMNS[0].to_string(),
            }
        })?;
        let key_column_index = root.children()[key_pos].data_type().column_index();

        let row_count = meta.number_of_rows();
        let boundary = if row_count == 0 {
            ShardBoundary::empty()
        } else {
            let stats = meta
                .column_file_statistics()
                .get(key_column_index)
                .and_then(|s| s.type_statistics());
            match stats {
                Some(TypeStatistics::String { min, max, .. }) => ShardBoundary {
                    row_count,
                    min_key: min.clone(),
                    max_key: max.clone(),
                    has_statistics: true,
                },
                _ => ShardBoundary {
                    row_count,
                    ..ShardBoundary::default()
                },
            }
        };

        let column_indices = inventory_column_positions(names.iter().copied())
            .into_iter()
            .map(|pos| root.children()[pos].data_type().column_index())
            .collect();
        let stripes = meta
            .stripe_metadatas()
            .iter()
            .map(|s| StripeSpan {
                offset: s.offset(),
                rows: s.number_of_rows(),
            })
            .collect();

        Ok(Self {
            key: key.to_string(),
            reader,
            boundary,
            column_indices,
            stripes,
        })
    }
}

/// First stripe holding `start_row`, with the rows that precede it.
fn locate_stripe(stripes: &[StripeSpan], start_row: u64) -> Option<(StripeSpan, u64)> {
    let mut rows_before = 0u64;
    for stripe in stripes {
        if rows_before + stripe.rows > start_row {
            return Some((*stripe, rows_before));
        }
        rows_before += stripe.rows;
    }
    None
}

impl ShardSource for OrcShard {
    fn key(&self) -> &str {
        &self.key
    }

    fn boundary(&self) -> &ShardBoundary {
        &self.boundary
    }

    // ORC has no row-level seek; whole stripes before `start_row` are skipped
    // by byte range and the remainder inside the stripe is discarded.
    fn open_batches(&self, start_row: u64, batch_size: usize) -> Result<(BatchStream, u64)> {
        let mut builder = ArrowReaderBuilder::try_new(self.reader.clone())
            .map_err(|e| InventoryError::shard(&self.key, ShardStage::Open, e))?;
        let mask = ProjectionMask::roots(
            builder.file_metadata().root_data_type(),
            self.column_indices.iter().copied(),
        );
        builder = builder.with_projection(mask).with_batch_size(batch_size);

        let mut discard = start_row;
        if let Some((stripe, rows_before)) = locate_stripe(&self.stripes, start_row)
            && rows_before > 0
        {
            let start = stripe.offset as usize;
            let end = self.reader.file_len() as usize;
            builder = builder.with_file_byte_range(start..end);
            discard = start_row - rows_before;
        }
        let reader = builder.build();
        Ok((Box::new(reader.map(|r| r.map_err(|e| e.to_string()))), discard))
    }
}
