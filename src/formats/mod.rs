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
//! Shard readers over the two inventory file formats.
//!
//! Both formats decode into Arrow record batches; [`ShardReader`] turns those
//! into [`InventoryObject`]s written into caller-owned slots. Which decoder
//! backs a reader is decided by [`InventoryFormat`] at open time.

use std::fmt;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Int64Array, RecordBatch, StringArray,
    TimestampSecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Int64Type, TimeUnit, TimestampSecondType};

use crate::common::error::{InventoryError, Result, ShardStage};
use crate::common::logging::debug;
use crate::fs::opendal::OpendalRangeReader;

pub mod orc;
pub mod parquet;

pub const ORC_FORMAT_NAME: &str = "ORC";
pub const PARQUET_FORMAT_NAME: &str = "Parquet";

pub(crate) const BUCKET_COLUMNS: &[&str] = &["bucket"];
pub(crate) const KEY_COLUMNS: &[&str] = &["key"];
pub(crate) const SIZE_COLUMNS: &[&str] = &["size"];
pub(crate) const LAST_MODIFIED_COLUMNS: &[&str] = &["last_modified_date", "last_modified"];
pub(crate) const CHECKSUM_COLUMNS: &[&str] = &["e_tag", "etag"];
pub(crate) const IS_LATEST_COLUMNS: &[&str] = &["is_latest"];
pub(crate) const IS_DELETE_MARKER_COLUMNS: &[&str] = &["is_delete_marker"];

const INVENTORY_COLUMNS: &[&[&str]] = &[
    BUCKET_COLUMNS,
    KEY_COLUMNS,
    SIZE_COLUMNS,
    LAST_MODIFIED_COLUMNS,
    CHECKSUM_COLUMNS,
    IS_LATEST_COLUMNS,
    IS_DELETE_MARKER_COLUMNS,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InventoryFormat {
    Orc,
    Parquet,
}

impl InventoryFormat {
    /// Matches the literal values the storage provider writes into `fileFormat`.
    pub fn from_manifest_value(value: &str) -> Option<Self> {
        match value {
            ORC_FORMAT_NAME => Some(InventoryFormat::Orc),
            PARQUET_FORMAT_NAME => Some(InventoryFormat::Parquet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryFormat::Orc => ORC_FORMAT_NAME,
            InventoryFormat::Parquet => PARQUET_FORMAT_NAME,
        }
    }
}

impl fmt::Display for InventoryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inventory row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InventoryObject {
    pub bucket: String,
    pub key: String,
    pub size: Option<i64>,
    /// Seconds since the Unix epoch.
    pub last_modified: Option<i64>,
    pub checksum: Option<String>,
    pub is_latest: Option<bool>,
    pub is_delete_marker: Option<bool>,
}

/// Boundary information of one shard, available without decoding rows.
pub trait InventoryMetadataReader: Send {
    fn row_count(&self) -> u64;
    fn min_value(&self) -> &str;
    fn max_value(&self) -> &str;
    /// Releases the decode session. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

pub trait InventoryFileReader: InventoryMetadataReader {
    /// Moves the cursor `n` rows forward. Fails if fewer than `n` rows remain.
    fn skip(&mut self, n: u64) -> Result<()>;

    /// Fills `buf` from the front and returns how many slots were written.
    /// A count below `buf.len()` means the shard is exhausted; `Ok(0)` on an
    /// exhausted shard is the end-of-shard signal.
    fn read_batch(&mut self, buf: &mut [InventoryObject]) -> Result<usize>;
}

pub(crate) type BatchStream =
    Box<dyn Iterator<Item = std::result::Result<RecordBatch, String>> + Send>;

/// Format-specific half of a shard reader.
pub(crate) trait ShardSource: Send {
    fn key(&self) -> &str;
    fn boundary(&self) -> &ShardBoundary;
    /// Opens a decoder at or before `start_row`; returns it together with the
    /// number of leading rows the caller must discard to reach `start_row`.
    fn open_batches(&self, start_row: u64, batch_size: usize) -> Result<(BatchStream, u64)>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardBoundary {
    pub row_count: u64,
    pub min_key: String,
    pub max_key: String,
    /// False when the file carries no key statistics; min/max are empty then.
    pub has_statistics: bool,
}

impl ShardBoundary {
    pub fn empty() -> Self {
        Self {
            has_statistics: true,
            ..Self::default()
        }
    }
}

fn require_statistics(key: &str, boundary: &ShardBoundary) -> Result<()> {
    if boundary.has_statistics {
        return Ok(());
    }
    Err(InventoryError::MissingStatistics {
        key: key.to_string(),
        column: KEY_COLUMNS[0].to_string(),
    })
}

pub(crate) fn find_column<'a>(
    names: impl IntoIterator<Item = &'a str>,
    aliases: &[&str],
) -> Option<usize> {
    let names: Vec<&str> = names.into_iter().collect();
    aliases.iter().find_map(|alias| {
        names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(alias))
    })
}

/// Positions of the inventory columns present in a file schema, in schema order.
pub(crate) fn inventory_column_positions<'a>(
    names: impl IntoIterator<Item = &'a str> + Clone,
) -> Vec<usize> {
    let mut positions: Vec<usize> = INVENTORY_COLUMNS
        .iter()
        .filter_map(|aliases| find_column(names.clone(), aliases))
        .collect();
    positions.sort_unstable();
    positions.dedup();
    positions
}

/// Columns of one decoded batch, normalized to the record field types.
struct BatchColumns {
    rows: usize,
    bucket: StringArray,
    key: StringArray,
    size: Option<Int64Array>,
    last_modified: Option<TimestampSecondArray>,
    checksum: Option<StringArray>,
    is_latest: Option<BooleanArray>,
    is_delete_marker: Option<BooleanArray>,
}

impl BatchColumns {
    fn try_new(shard_key: &str, batch: &RecordBatch) -> Result<Self> {
        let schema = batch.schema();
        let names = || schema.fields().iter().map(|f| f.name().as_str());
        let column = |aliases: &[&str]| find_column(names(), aliases).map(|i| batch.column(i));
        let required = |aliases: &[&str]| {
            column(aliases).ok_or_else(|| InventoryError::MissingColumn {
                key: shard_key.to_string(),
                column: aliases[0].to_string(),
            })
        };
        let convert = |array: &ArrayRef, to: &DataType| {
            cast(array, to).map_err(|e| InventoryError::shard(shard_key, ShardStage::Read, e))
        };

        let bucket = convert(required(BUCKET_COLUMNS)?, &DataType::Utf8)?;
        let key = convert(required(KEY_COLUMNS)?, &DataType::Utf8)?;
        let size = column(SIZE_COLUMNS)
            .map(|a| convert(a, &DataType::Int64))
            .transpose()?;
        let last_modified = column(LAST_MODIFIED_COLUMNS)
            .map(|a| convert(a, &DataType::Timestamp(TimeUnit::Second, None)))
            .transpose()?;
        let checksum = column(CHECKSUM_COLUMNS)
            .map(|a| convert(a, &DataType::Utf8))
            .transpose()?;
        let is_latest = column(IS_LATEST_COLUMNS)
            .map(|a| convert(a, &DataType::Boolean))
            .transpose()?;
        let is_delete_marker = column(IS_DELETE_MARKER_COLUMNS)
            .map(|a| convert(a, &DataType::Boolean))
            .transpose()?;

        Ok(Self {
            rows: batch.num_rows(),
            bucket: bucket.as_string::<i32>().clone(),
            key: key.as_string::<i32>().clone(),
            size: size.map(|a| a.as_primitive::<Int64Type>().clone()),
            last_modified: last_modified.map(|a| a.as_primitive::<TimestampSecondType>().clone()),
            checksum: checksum.map(|a| a.as_string::<i32>().clone()),
            is_latest: is_latest.map(|a| a.as_boolean().clone()),
            is_delete_marker: is_delete_marker.map(|a| a.as_boolean().clone()),
        })
    }

    fn fill(&self, shard_key: &str, row: usize, out: &mut InventoryObject) -> Result<()> {
        if self.key.is_null(row) || self.bucket.is_null(row) {
            return Err(InventoryError::shard(
                shard_key,
                ShardStage::Read,
                format!("null bucket or key at batch row {row}"),
            ));
        }
        assign(&mut out.bucket, self.bucket.value(row));
        assign(&mut out.key, self.key.value(row));
        out.size = self
            .size
            .as_ref()
            .and_then(|a| a.is_valid(row).then(|| a.value(row)));
        out.last_modified = self
            .last_modified
            .as_ref()
            .and_then(|a| a.is_valid(row).then(|| a.value(row)));
        assign_opt(
            &mut out.checksum,
            self.checksum
                .as_ref()
                .and_then(|a| a.is_valid(row).then(|| a.value(row))),
        );
        out.is_latest = self
            .is_latest
            .as_ref()
            .and_then(|a| a.is_valid(row).then(|| a.value(row)));
        out.is_delete_marker = self
            .is_delete_marker
            .as_ref()
            .and_then(|a| a.is_valid(row).then(|| a.value(row)));
        Ok(())
    }
}

// Reuses the slot's allocation.
fn assign(dst: &mut String, src: &str) {
    dst.clear();
    dst.push_str(src);
}

fn assign_opt(dst: &mut Option<String>, src: Option<&str>) {
    match (dst.as_mut(), src) {
        (Some(d), Some(s)) => assign(d, s),
        (None, Some(s)) => *dst = Some(s.to_string()),
        (_, None) => *dst = None,
    }
}

struct Decoder {
    batches: BatchStream,
    current: Option<BatchColumns>,
    offset: usize,
    discard: u64,
}

/// A shard reader: cached boundary metadata plus a decoder that is opened
/// lazily on the first read, so metadata-only use never decodes rows.
pub struct ShardReader<S> {
    source: S,
    batch_size: usize,
    position: u64,
    decoder: Option<Decoder>,
    closed: bool,
}

impl<S: ShardSource> ShardReader<S> {
    pub(crate) fn new(source: S, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            position: 0,
            decoder: None,
            closed: false,
        }
    }

    fn remaining(&self) -> u64 {
        self.source.boundary().row_count.saturating_sub(self.position)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(InventoryError::Closed {
                key: self.source.key().to_string(),
            });
        }
        Ok(())
    }

    fn decoder(&mut self) -> Result<&mut Decoder> {
        if self.decoder.is_none() {
            let (batches, discard) = self.source.open_batches(self.position, self.batch_size)?;
            debug!(
                "open decoder: shard={} start_row={} discard={}",
                self.source.key(),
                self.position,
                discard
            );
            self.decoder = Some(Decoder {
                batches,
                current: None,
                offset: 0,
                discard,
            });
        }
        self.decoder.as_mut().ok_or_else(|| {
            InventoryError::shard(self.source.key(), ShardStage::Open, "decoder not initialized")
        })
    }

    fn fill(&mut self, buf: &mut [InventoryObject]) -> Result<usize> {
        let key = self.source.key().to_string();
        let row_count = self.source.boundary().row_count;
        let mut filled = 0;
        while filled < buf.len() && self.position < row_count {
            let position = self.position;
            let decoder = self.decoder()?;
            let exhausted = decoder
                .current
                .as_ref()
                .is_none_or(|cols| decoder.offset >= cols.rows);
            if exhausted {
                let batch = match decoder.batches.next() {
                    Some(Ok(batch)) => batch,
                    Some(Err(e)) => {
                        return Err(InventoryError::shard(&key, ShardStage::Read, e));
                    }
                    None => {
                        return Err(InventoryError::shard(
                            &key,
                            ShardStage::Read,
                            format!("decoder ended at row {position} of {row_count}"),
                        ));
                    }
                };
                decoder.current = Some(BatchColumns::try_new(&key, &batch)?);
                decoder.offset = 0;
                continue;
            }
            let Some(cols) = decoder.current.as_ref() else {
                continue;
            };
            let available = cols.rows - decoder.offset;
            if decoder.discard > 0 {
                let dropped = std::cmp::min(decoder.discard, available as u64);
                decoder.discard -= dropped;
                decoder.offset += dropped as usize;
                continue;
            }
            let take = std::cmp::min(available, buf.len() - filled);
            for (i, slot) in buf[filled..filled + take].iter_mut().enumerate() {
                cols.fill(&key, decoder.offset + i, slot)?;
            }
            decoder.offset += take;
            filled += take;
            self.position += take as u64;
        }
        Ok(filled)
    }
}

impl<S: ShardSource> InventoryMetadataReader for ShardReader<S> {
    fn row_count(&self) -> u64 {
        self.source.boundary().row_count
    }

    fn min_value(&self) -> &str {
        &self.source.boundary().min_key
    }

    fn max_value(&self) -> &str {
        &self.source.boundary().max_key
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.decoder = None;
        self.closed = true;
        debug!(
            "close shard reader: shard={} position={}",
            self.source.key(),
            self.position
        );
        Ok(())
    }
}

impl<S: ShardSource> InventoryFileReader for ShardReader<S> {
    fn skip(&mut self, n: u64) -> Result<()> {
        self.check_open()?;
        let remaining = self.remaining();
        if n > remaining {
            return Err(InventoryError::shard(
                self.source.key(),
                ShardStage::Skip,
                format!("cannot skip {n} rows, {remaining} remaining"),
            ));
        }
        if n == 0 {
            return Ok(());
        }
        // Stay on the decoded batch when the skip lands inside it, otherwise
        // reopen lazily at the new position.
        let absorbed = self.decoder.as_mut().is_some_and(|d| {
            let buffered = d.current.as_ref().map_or(0, |c| c.rows - d.offset) as u64;
            if d.discard == 0 && n <= buffered {
                d.offset += n as usize;
                true
            } else {
                false
            }
        });
        if !absorbed {
            self.decoder = None;
        }
        self.position += n;
        Ok(())
    }

    fn read_batch(&mut self, buf: &mut [InventoryObject]) -> Result<usize> {
        self.check_open()?;
        match self.fill(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.decoder = None;
                Err(e)
            }
        }
    }
}

/// Opens the reader variant matching `format` over one shard file.
pub fn open_file_reader(
    format: InventoryFormat,
    key: &str,
    reader: OpendalRangeReader,
    batch_size: usize,
) -> Result<Box<dyn InventoryFileReader>> {
    Ok(match format {
        InventoryFormat::Parquet => Box::new(ShardReader::new(
            parquet::ParquetShard::open(key, reader)?,
            batch_size,
        )),
        InventoryFormat::Orc => Box::new(ShardReader::new(
            orc::OrcShard::open(key, reader)?,
            batch_size,
        )),
    })
}

/// Like [`open_file_reader`] but hands out only the boundary view, which is
/// useless without key statistics, so their absence is an error here.
pub fn open_metadata_reader(
    format: InventoryFormat,
    key: &str,
    reader: OpendalRangeReader,
) -> Result<Box<dyn InventoryMetadataReader>> {
    Ok(match format {
        InventoryFormat::Parquet => {
            let shard = parquet::ParquetShard::open(key, reader)?;
            require_statistics(key, shard.boundary())?;
            Box::new(ShardReader::new(shard, 1))
        }
        InventoryFormat::Orc => {
            let shard = orc::OrcShard::open(key, reader)?;
            require_statistics(key, shard.boundary())?;
            Box::new(ShardReader::new(shard, 1))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, TimestampMillisecondArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    struct VecSource {
        key: String,
        boundary: ShardBoundary,
        batches: Vec<RecordBatch>,
        opens: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ShardSource for VecSource {
        fn key(&self) -> &str {
            &self.key
        }

        fn boundary(&self) -> &ShardBoundary {
            &self.boundary
        }

        fn open_batches(&self, start_row: u64, _batch_size: usize) -> Result<(BatchStream, u64)> {
            self.opens.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let batches: Vec<_> = self.batches.iter().cloned().map(Ok).collect();
            Ok((Box::new(batches.into_iter()), start_row))
        }
    }

    fn batch(keys: &[&str]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("bucket", DataType::Utf8, false),
            Field::new("Key", DataType::Utf8, false),
            Field::new("size", DataType::Int32, true),
            Field::new(
                "last_modified_date",
                DataType::Timestamp(TimeUnit::Millisecond, None),
                true,
            ),
            Field::new("e_tag", DataType::Utf8, true),
        ]));
        let n = keys.len();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["data-bucket"; n])),
                Arc::new(StringArray::from(keys.to_vec())),
                Arc::new(Int32Array::from((0..n as i32).collect::<Vec<_>>())),
                Arc::new(TimestampMillisecondArray::from(vec![Some(1_700_000_000_500); n])),
                Arc::new(StringArray::from(vec![None::<&str>; n])),
            ],
        )
        .expect("build batch")
    }

    fn reader(batches: Vec<RecordBatch>) -> (ShardReader<VecSource>, Arc<std::sync::atomic::AtomicUsize>) {
        let rows = batches.iter().map(|b| b.num_rows() as u64).sum();
        let opens = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let source = VecSource {
            key: "inv/a.parquet".to_string(),
            boundary: ShardBoundary {
                row_count: rows,
                min_key: "a".to_string(),
                max_key: "e".to_string(),
                has_statistics: true,
            },
            batches,
            opens: Arc::clone(&opens),
        };
        (ShardReader::new(source, 2), opens)
    }

    #[test]
    fn format_names_are_exact() {
        assert_eq!(
            InventoryFormat::from_manifest_value("ORC"),
            Some(InventoryFormat::Orc)
        );
        assert_eq!(
            InventoryFormat::from_manifest_value("Parquet"),
            Some(InventoryFormat::Parquet)
        );
        assert_eq!(InventoryFormat::from_manifest_value("parquet"), None);
        assert_eq!(InventoryFormat::from_manifest_value("CSV"), None);
    }

    #[test]
    fn read_batch_crosses_record_batches_and_normalizes_types() {
        let (mut r, _) = reader(vec![batch(&["a", "b", "c"]), batch(&["d", "e"])]);
        let mut buf = vec![InventoryObject::default(); 4];
        assert_eq!(r.read_batch(&mut buf).expect("first batch"), 4);
        let keys: Vec<_> = buf.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c", "d"]);
        assert_eq!(buf[1].size, Some(1));
        assert_eq!(buf[0].last_modified, Some(1_700_000_000));
        assert_eq!(buf[0].checksum, None);
        assert_eq!(buf[0].bucket, "data-bucket");

        assert_eq!(r.read_batch(&mut buf).expect("short batch"), 1);
        assert_eq!(buf[0].key, "e");
        assert_eq!(r.read_batch(&mut buf).expect("end of shard"), 0);
    }

    #[test]
    fn skip_inside_buffered_batch_keeps_decoder() {
        let (mut r, opens) = reader(vec![batch(&["a", "b", "c"]), batch(&["d", "e"])]);
        let mut one = vec![InventoryObject::default(); 1];
        r.read_batch(&mut one).expect("read a");
        r.skip(1).expect("skip b");
        r.read_batch(&mut one).expect("read c");
        assert_eq!(one[0].key, "c");
        assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn skip_past_remaining_rows_fails() {
        let (mut r, _) = reader(vec![batch(&["a", "b"])]);
        r.skip(2).expect("skip all");
        let err = r.skip(1).expect_err("nothing left");
        assert!(err.to_string().contains("cannot skip 1 rows, 0 remaining"));
        let mut buf = vec![InventoryObject::default(); 3];
        assert_eq!(r.read_batch(&mut buf).expect("exhausted"), 0);
    }

    #[test]
    fn close_is_idempotent_and_blocks_reads() {
        let (mut r, opens) = reader(vec![batch(&["a"])]);
        assert_eq!(r.row_count(), 1);
        assert_eq!(r.min_value(), "a");
        r.close().expect("close");
        r.close().expect("second close is a no-op");
        let mut buf = vec![InventoryObject::default(); 1];
        assert!(matches!(
            r.read_batch(&mut buf),
            Err(InventoryError::Closed { .. })
        ));
        assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_key_column_is_reported() {
        let schema = Arc::new(Schema::new(vec![Field::new("bucket", DataType::Utf8, false)]));
        let b = RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["x"]))])
            .expect("batch");
        let (mut r, _) = reader(vec![b]);
        let mut buf = vec![InventoryObject::default(); 1];
        let err = r.read_batch(&mut buf).expect_err("missing key");
        assert!(matches!(err, InventoryError::MissingColumn { ref column, .. } if column == "key"));
    }

    #[test]
    fn boundary_without_statistics_is_rejected_for_ordering() {
        let boundary = ShardBoundary {
            row_count: 10,
            ..ShardBoundary::default()
        };
        assert!(matches!(
            require_statistics("a.orc", &boundary),
            Err(InventoryError::MissingStatistics { .. })
        ));
        require_statistics("empty.orc", &ShardBoundary::empty()).expect("empty shard");
    }

    #[test]
    fn column_positions_follow_schema_order() {
        let names = ["e_tag", "junk", "KEY", "bucket", "size"];
        assert_eq!(inventory_column_positions(names.iter().copied()), vec![0, 2, 3, 4]);
    }
}
