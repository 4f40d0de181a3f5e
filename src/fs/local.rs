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
use anyhow::{Context, Result, anyhow};
use opendal::Operator;
use std::path::{Path, PathBuf};

use crate::fs::object_store::BucketOperators;

pub fn build_fs_operator(root: &str) -> Result<Operator> {
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder)
        .context("init opendal fs operator")?
        .finish();
    Ok(op)
}

/// Buckets laid out as directories below one local root, `<root>/<bucket>/<key>`.
///
/// Useful for inventories mirrored to disk and for tests.
#[derive(Clone, Debug)]
pub struct FsBucketOperators {
    root: PathBuf,
}

impl FsBucketOperators {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(anyhow!("invalid bucket name for local layout: {bucket:?}"));
        }
        Ok(self.root.join(bucket))
    }
}

impl BucketOperators for FsBucketOperators {
    fn operator(&self, bucket: &str) -> Result<Operator> {
        let dir = self.bucket_dir(bucket)?;
        build_fs_operator(&dir.to_string_lossy())
    }
}
