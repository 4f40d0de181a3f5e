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
//! Error taxonomy for inventory loading, ordering and iteration.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, InventoryError>;

/// Where a shard-level failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardStage {
    Open,
    Metadata,
    Skip,
    Read,
}

impl std::fmt::Display for ShardStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShardStage::Open => "open",
            ShardStage::Metadata => "metadata",
            ShardStage::Skip => "skip",
            ShardStage::Read => "read",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("invalid inventory url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("fetch {location} failed: {message}")]
    Fetch { location: String, message: String },

    #[error("decode manifest {url} failed: {message}")]
    Decode { url: String, message: String },

    #[error("unsupported inventory type. supported types: parquet, orc. got format: {format}")]
    UnsupportedFormat { format: String },

    #[error("failed to parse inventory bucket arn {arn}: {message}")]
    MalformedDestination { arn: String, message: String },

    #[error("failed to sort inventory files in manifest {url}: shard {key}: {source}")]
    Ordering {
        url: String,
        key: String,
        #[source]
        source: Box<InventoryError>,
    },

    #[error("inventory file {key} {stage} failed: {message}")]
    ShardRead {
        key: String,
        stage: ShardStage,
        message: String,
    },

    #[error("inventory file {key} is missing column {column}")]
    MissingColumn { key: String, column: String },

    #[error("inventory file {key} has no statistics for column {column}")]
    MissingStatistics { key: String, column: String },

    #[error("inventory iteration cancelled at shard {key}")]
    Cancelled { key: String },

    #[error("inventory file {key} is already closed")]
    Closed { key: String },
}

impl InventoryError {
    pub fn shard(key: impl Into<String>, stage: ShardStage, err: impl std::fmt::Display) -> Self {
        InventoryError::ShardRead {
            key: key.into(),
            stage,
            message: err.to_string(),
        }
    }

    pub fn fetch(location: impl Into<String>, err: &anyhow::Error) -> Self {
        InventoryError::Fetch {
            location: location.into(),
            message: format!("{err:#}"),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InventoryError::Cancelled { .. })
    }

    /// Shard key the error is attached to, if any.
    pub fn shard_key(&self) -> Option<&str> {
        match self {
            InventoryError::Ordering { key, .. }
            | InventoryError::ShardRead { key, .. }
            | InventoryError::MissingColumn { key, .. }
            | InventoryError::MissingStatistics { key, .. }
            | InventoryError::Cancelled { key }
            | InventoryError::Closed { key } => Some(key),
            _ => None,
        }
    }
}
