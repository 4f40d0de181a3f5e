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
use std::fmt;

/// A bucket/key pair addressed as `s3://<bucket>/<key>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

// s3a:// shows up in manifests copied from Hadoop tooling.
const OBJECT_URL_SCHEMES: [&str; 2] = ["s3://", "s3a://"];

pub fn parse_object_url(raw: &str) -> Result<ObjectLocation, String> {
    let url = raw.trim();
    let rest = OBJECT_URL_SCHEMES
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme))
        .ok_or_else(|| "expected s3://<bucket>/<key>".to_string())?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| "missing object key".to_string())?;
    if bucket.is_empty() {
        return Err("missing bucket".to_string());
    }
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return Err("missing object key".to_string());
    }
    Ok(ObjectLocation::new(bucket, key))
}
