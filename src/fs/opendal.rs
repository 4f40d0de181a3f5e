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
//! Blocking object-store client over opendal.
//!
//! Inventory reading is synchronous from the caller's perspective, so every
//! opendal future is driven on a runtime owned by the store. Shard files are
//! exposed as [`OpendalRangeReader`]s which serve ranged reads to both the
//! Parquet and the ORC decoders.

use crate::common::config;
use crate::common::logging::debug;
use crate::fs::local::FsBucketOperators;
use crate::fs::object_store::{BucketOperators, ObjectStoreConfig, S3BucketOperators};
use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use opendal::Operator;
use orc_rust::reader::ChunkReader as OrcChunkReader;
use parquet::errors::{ParquetError, Result as ParquetResult};
use parquet::file::reader::{ChunkReader, Length};
use std::future::IntoFuture;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Runtime;

pub const DEFAULT_OPENDAL_READ_SIZE: usize = 8 * 1024 * 1024;

const STORE_RUNTIME_WORKERS: usize = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoStats {
    pub read_requests: u64,
    pub bytes_read: u64,
    pub stat_requests: u64,
}

#[derive(Debug, Default)]
struct IoCounters {
    read_requests: AtomicU64,
    bytes_read: AtomicU64,
    stat_requests: AtomicU64,
}

impl IoCounters {
    fn record_read(&self, length: usize) {
        self.read_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(length as u64, Ordering::Relaxed);
    }

    fn record_stat(&self) {
        self.stat_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> IoStats {
        IoStats {
            read_requests: self.read_requests.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            stat_requests: self.stat_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_length: u64,
}

/// The object-store collaborator: whole-object reads, metadata lookups and
/// ranged readers, addressed by bucket and key. No write operations.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    operators: Arc<dyn BucketOperators>,
    rt: Arc<Runtime>,
    block_size: usize,
    counters: Arc<IoCounters>,
}

impl ObjectStore {
    pub fn new(operators: Arc<dyn BucketOperators>) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(STORE_RUNTIME_WORKERS)
            .thread_name("inventory-io")
            .enable_all()
            .build()
            .context("init tokio runtime for object store")?;
        Ok(Self {
            operators,
            rt: Arc::new(rt),
            block_size: config::opendal_read_block_size(),
            counters: Arc::new(IoCounters::default()),
        })
    }

    pub fn s3(template: ObjectStoreConfig) -> Result<Self> {
        Self::new(Arc::new(S3BucketOperators::new(template)))
    }

    pub fn local(root: impl AsRef<Path>) -> Result<Self> {
        Self::new(Arc::new(FsBucketOperators::new(root)))
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        if block_size > 0 {
            self.block_size = block_size;
        }
        self
    }

    pub fn io_stats(&self) -> IoStats {
        self.counters.snapshot()
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let op = self.operators.operator(bucket)?;
        let data = self
            .rt
            .block_on(op.read(key))
            .with_context(|| format!("opendal read: s3://{bucket}/{key}"))?;
        let bytes = data.to_bytes();
        self.counters.record_read(bytes.len());
        Ok(bytes)
    }

    pub fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        let op = self.operators.operator(bucket)?;
        self.counters.record_stat();
        let meta = self
            .rt
            .block_on(op.stat(key))
            .with_context(|| format!("opendal stat: s3://{bucket}/{key}"))?;
        Ok(ObjectMeta {
            content_length: meta.content_length(),
        })
    }

    /// Opens a ranged reader. A known length skips the `stat` round-trip.
    pub fn open_reader(
        &self,
        bucket: &str,
        key: &str,
        len: Option<u64>,
    ) -> Result<OpendalRangeReader> {
        let len = match len.filter(|v| *v > 0) {
            Some(len) => len,
            None => self.head_object(bucket, key)?.content_length,
        };
        let op = self.operators.operator(bucket)?;
        debug!("open range reader: s3://{}/{} len={}", bucket, key, len);
        Ok(OpendalRangeReader {
            op,
            rt: Arc::clone(&self.rt),
            path: key.to_string(),
            len,
            block_size: self.block_size,
            counters: Arc::clone(&self.counters),
        })
    }
}

#[derive(Clone, Debug)]
pub struct OpendalRangeReader {
    op: Operator,
    rt: Arc<Runtime>,
    path: String,
    len: u64,
    block_size: usize,
    counters: Arc<IoCounters>,
}

impl OpendalRangeReader {
    pub fn file_len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let data = self
            .rt
            .block_on(self.op.read_with(&self.path).range(start..end).into_future())
            .with_context(|| format!("opendal read range {start}..{end}: {}", self.path))?;
        let bytes = data.to_bytes();
        if bytes.len() as u64 != end - start {
            return Err(anyhow!(
                "short read on {}: expected {} bytes at offset {}, got {}",
                self.path,
                end - start,
                start,
                bytes.len()
            ));
        }
        self.counters.record_read(bytes.len());
        Ok(bytes)
    }

    fn sequential_read(&self, start: u64) -> OpendalRead {
        OpendalRead {
            reader: self.clone(),
            pos: start,
            buf: Bytes::new(),
            buf_pos: 0,
        }
    }
}

/// Sequential view over a range reader, refilled one block at a time.
pub struct OpendalRead {
    reader: OpendalRangeReader,
    pos: u64,
    buf: Bytes,
    buf_pos: usize,
}

impl OpendalRead {
    fn refill(&mut self) -> io::Result<()> {
        let len = self.reader.len;
        if self.pos >= len {
            self.buf = Bytes::new();
            self.buf_pos = 0;
            return Ok(());
        }
        let fetch_len = std::cmp::min(self.reader.block_size as u64, len - self.pos);
        self.buf = self
            .reader
            .read_range(self.pos, self.pos + fetch_len)
            .map_err(|e| io::Error::other(format!("{e:#}")))?;
        self.buf_pos = 0;
        Ok(())
    }
}

impl Read for OpendalRead {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.reader.len {
            return Ok(0);
        }
        if self.buf_pos >= self.buf.len() {
            self.refill()?;
            if self.buf.is_empty() {
                return Ok(0);
            }
        }
        let available = &self.buf[self.buf_pos..];
        let to_copy = std::cmp::min(available.len(), out.len());
        out[..to_copy].copy_from_slice(&available[..to_copy]);
        self.buf_pos += to_copy;
        self.pos += to_copy as u64;
        Ok(to_copy)
    }
}

impl Length for OpendalRangeReader {
    fn len(&self) -> u64 {
        self.len
    }
}

impl ChunkReader for OpendalRangeReader {
    type T = OpendalRead;

    fn get_read(&self, start: u64) -> ParquetResult<Self::T> {
        if start > self.len {
            return Err(ParquetError::EOF(format!(
                "Expected to read at offset {start}, while file has length {}",
                self.len
            )));
        }
        Ok(self.sequential_read(start))
    }

    fn get_bytes(&self, start: u64, length: usize) -> ParquetResult<Bytes> {
        let end = start
            .checked_add(length as u64)
            .ok_or_else(|| ParquetError::General("range overflow".to_string()))?;
        if end > self.len {
            return Err(ParquetError::EOF(format!(
                "Expected to read {length} bytes at offset {start}, while file has length {}",
                self.len
            )));
        }
        self.read_range(start, end)
            .map_err(|e| ParquetError::General(format!("{e:#}")))
    }
}

impl OrcChunkReader for OpendalRangeReader {
    type T = OpendalRead;

    fn len(&self) -> u64 {
        self.len
    }

    fn get_read(&self, offset_from_start: u64) -> io::Result<Self::T> {
        if offset_from_start > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "expected to read at offset {}, while file has length {}",
                    offset_from_start, self.len
                ),
            ));
        }
        Ok(self.sequential_read(offset_from_start))
    }
}
