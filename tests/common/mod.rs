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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use tempfile::TempDir;

use bucket_inventory::ObjectStore;
use bucket_inventory::inventory_logging;

pub const MANIFEST_BUCKET: &str = "inventory-manifests";
pub const DESTINATION_BUCKET: &str = "inventory-destination";
pub const SOURCE_BUCKET: &str = "example-source-bucket";
pub const LAST_MODIFIED_MS: i64 = 1_600_000_000_000;

/// Buckets laid out as directories of a temp dir, served by the opendal `Fs`
/// service through [`ObjectStore::local`].
pub struct InventoryFixture {
    pub temp_dir: TempDir,
    pub store: ObjectStore,
}

impl InventoryFixture {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir().context("tempdir")?;
        let store = ObjectStore::local(temp_dir.path()).context("local object store")?;
        Ok(Self { temp_dir, store })
    }

    pub fn init_logging(&self) {
        inventory_logging::init_with_level("debug");
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let path = self.temp_dir.path().join(bucket).join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        Ok(path)
    }

    /// Writes a Parquet shard into the destination bucket, 1000 rows per row group.
    pub fn write_parquet_shard(&self, key: &str, keys: &[String]) -> Result<u64> {
        let path = self.object_path(DESTINATION_BUCKET, key)?;
        let props = WriterProperties::builder()
            .set_max_row_group_size(1000)
            .set_statistics_enabled(EnabledStatistics::Chunk)
            .build();
        let batch = inventory_batch(keys)?;
        let file = std::fs::File::create(&path).context("create parquet shard")?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .context("create parquet writer")?;
        writer.write(&batch).context("write parquet batch")?;
        writer.close().context("close parquet writer")?;
        file_len(&path)
    }

    pub fn write_orc_shard(&self, key: &str, keys: &[String]) -> Result<u64> {
        let path = self.object_path(DESTINATION_BUCKET, key)?;
        // no timestamp column: ORC shards here carry bucket, key, size and e_tag
        let batch = inventory_batch(keys)?
            .project(&[0, 1, 2, 4])
            .context("project orc columns")?;
        let file = std::fs::File::create(&path).context("create orc shard")?;
        let mut writer = orc_rust::ArrowWriterBuilder::new(file, batch.schema())
            .try_build()
            .context("create orc writer")?;
        writer.write(&batch).context("write orc batch")?;
        writer.close().context("close orc writer")?;
        file_len(&path)
    }

    /// Copies a checked-in shard from `tests/data` into the destination bucket.
    pub fn copy_shard(&self, fixture: &str, key: &str) -> Result<u64> {
        let src = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("data")
            .join(fixture);
        let path = self.object_path(DESTINATION_BUCKET, key)?;
        std::fs::copy(&src, &path).with_context(|| format!("copy {}", src.display()))
    }

    /// Writes `manifest.json` listing `files` and returns its `s3://` URL.
    pub fn write_manifest(&self, format: &str, destination_arn: &str, files: &[&str]) -> Result<String> {
        let key = "example-source-bucket/daily/2024-03-07T00-00Z/manifest.json";
        let files: Vec<serde_json::Value> = files
            .iter()
            .map(|k| serde_json::json!({ "key": k, "MD5checksum": "d41d8cd98f00b204e9800998ecf8427e" }))
            .collect();
        let manifest = serde_json::json!({
            "sourceBucket": SOURCE_BUCKET,
            "destinationBucket": destination_arn,
            "version": "2016-11-30",
            "creationTimestamp": "1709769600000",
            "fileFormat": format,
            "files": files,
        });
        let path = self.object_path(MANIFEST_BUCKET, key)?;
        std::fs::write(&path, serde_json::to_vec_pretty(&manifest)?).context("write manifest")?;
        Ok(format!("s3://{MANIFEST_BUCKET}/{key}"))
    }
}

pub fn destination_arn() -> String {
    format!("arn:aws:s3:::{DESTINATION_BUCKET}")
}

pub fn numbered_keys(prefix: &str, rows: usize) -> Vec<String> {
    (0..rows).map(|i| format!("{prefix}/{i:08}")).collect()
}

fn inventory_batch(keys: &[String]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("bucket", DataType::Utf8, false),
        Field::new("key", DataType::Utf8, false),
        Field::new("size", DataType::Int64, true),
        Field::new(
            "last_modified_date",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            true,
        ),
        Field::new("e_tag", DataType::Utf8, true),
    ]));
    let n = keys.len();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![SOURCE_BUCKET; n])),
        Arc::new(StringArray::from(keys.to_vec())),
        Arc::new(Int64Array::from((0..n as i64).collect::<Vec<_>>())),
        Arc::new(TimestampMillisecondArray::from(vec![LAST_MODIFIED_MS; n])),
        Arc::new(StringArray::from(vec!["abcdefg"; n])),
    ];
    RecordBatch::try_new(schema, columns).context("build inventory batch")
}

fn file_len(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len())
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
}
