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
//! S3 operator construction for the buckets an inventory touches.
//!
//! An inventory spans at least two buckets (the one holding the manifest and
//! the destination bucket holding the shard files), so operators are built per
//! bucket from one connection template and cached.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use opendal::Operator;
use opendal::layers::{RetryLayer, TimeoutLayer};

const DEFAULT_S3_RETRY_MAX_TIMES: usize = 6;
const DEFAULT_S3_RETRY_MIN_DELAY_MS: u64 = 100;
const DEFAULT_S3_RETRY_MAX_DELAY_MS: u64 = 2_000;
const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub root: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub session_token: Option<String>,
    pub enable_path_style_access: Option<bool>,
    pub region: Option<String>,
    pub retry_max_times: Option<usize>,
    pub retry_min_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub io_timeout_ms: Option<u64>,
}

impl ObjectStoreConfig {
    pub fn for_bucket(&self, bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            ..self.clone()
        }
    }
}

/// Resolves the opendal operator serving a bucket.
pub trait BucketOperators: Send + Sync + fmt::Debug {
    fn operator(&self, bucket: &str) -> Result<Operator>;
}

/// S3 (or S3-compatible) buckets sharing one endpoint and credential set.
#[derive(Clone, Debug)]
pub struct S3BucketOperators {
    template: ObjectStoreConfig,
}

impl S3BucketOperators {
    pub fn new(template: ObjectStoreConfig) -> Self {
        Self { template }
    }
}

impl BucketOperators for S3BucketOperators {
    fn operator(&self, bucket: &str) -> Result<Operator> {
        if bucket.is_empty() {
            return Err(anyhow!("empty bucket name"));
        }
        build_s3_operator(&self.template.for_bucket(bucket))
    }
}

static S3_OPERATOR_CACHE: OnceLock<Mutex<HashMap<ObjectStoreConfig, Operator>>> =
    OnceLock::new();

fn s3_operator_cache() -> &'static Mutex<HashMap<ObjectStoreConfig, Operator>> {
    S3_OPERATOR_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn build_retry_layer(cfg: &ObjectStoreConfig) -> RetryLayer {
    let max_times = cfg.retry_max_times.unwrap_or(DEFAULT_S3_RETRY_MAX_TIMES);
    let min_delay_ms = cfg
        .retry_min_delay_ms
        .unwrap_or(DEFAULT_S3_RETRY_MIN_DELAY_MS);
    let max_delay_ms = cfg
        .retry_max_delay_ms
        .unwrap_or(DEFAULT_S3_RETRY_MAX_DELAY_MS)
        .max(min_delay_ms);

    RetryLayer::new()
        .with_jitter()
        .with_min_delay(Duration::from_millis(min_delay_ms))
        .with_max_delay(Duration::from_millis(max_delay_ms))
        .with_max_times(max_times)
}

fn build_timeout_layer(cfg: &ObjectStoreConfig) -> Option<TimeoutLayer> {
    let timeout = cfg.timeout_ms.filter(|v| *v > 0);
    let io_timeout = cfg.io_timeout_ms.filter(|v| *v > 0);
    if timeout.is_none() && io_timeout.is_none() {
        return None;
    }
    let mut layer = TimeoutLayer::new();
    if let Some(ms) = timeout {
        layer = layer.with_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = io_timeout {
        layer = layer.with_io_timeout(Duration::from_millis(ms));
    }
    Some(layer)
}

fn build_raw_s3_operator(cfg: &ObjectStoreConfig) -> Result<Operator> {
    let endpoint = normalize_s3_endpoint(&cfg.endpoint)?;
    let use_path_style = should_use_path_style(cfg);

    let mut builder = opendal::services::S3::default()
        .endpoint(&endpoint)
        .bucket(&cfg.bucket)
        .region(cfg.region.as_deref().unwrap_or(DEFAULT_S3_REGION));
    if !cfg.access_key_id.is_empty() {
        builder = builder
            .access_key_id(&cfg.access_key_id)
            .secret_access_key(&cfg.access_key_secret);
    }
    if !use_path_style {
        builder = builder.enable_virtual_host_style();
    }
    if let Some(token) = cfg.session_token.as_deref() {
        builder = builder.session_token(token);
    }
    if is_local_endpoint(&endpoint) {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .context("build reqwest client without proxy for local s3 endpoint")?;
        builder = builder.http_client(opendal::raw::HttpClient::with(client));
    }
    if !cfg.root.is_empty() {
        builder = builder.root(&cfg.root);
    }
    let mut op = Operator::new(builder)
        .with_context(|| format!("init opendal s3 operator for bucket {}", cfg.bucket))?
        .finish();

    if let Some(timeout_layer) = build_timeout_layer(cfg) {
        op = op.layer(timeout_layer);
    }
    op = op.layer(build_retry_layer(cfg));
    Ok(op)
}

fn endpoint_host(endpoint: &str) -> String {
    let view = endpoint.trim();
    let view = view
        .strip_prefix("http://")
        .or_else(|| view.strip_prefix("https://"))
        .unwrap_or(view);
    let authority = view.split_once('/').map_or(view, |(authority, _)| authority);
    if let Some(rest) = authority.strip_prefix('[')
        && let Some((host, _)) = rest.split_once(']')
    {
        return host.to_ascii_lowercase();
    }
    authority
        .split(':')
        .next()
        .unwrap_or(authority)
        .to_ascii_lowercase()
}

fn is_local_endpoint(endpoint: &str) -> bool {
    let host = endpoint_host(endpoint);
    host == "localhost" || host.parse::<IpAddr>().is_ok()
}

fn prefer_virtual_host_style(endpoint: &str) -> bool {
    let host = endpoint_host(endpoint);
    [".amazonaws.com", "storage.googleapis.com"]
        .iter()
        .any(|suffix| host.ends_with(suffix))
}

fn should_use_path_style(cfg: &ObjectStoreConfig) -> bool {
    cfg.enable_path_style_access
        .unwrap_or_else(|| !prefer_virtual_host_style(&cfg.endpoint))
}

fn normalize_s3_endpoint(raw_endpoint: &str) -> Result<String> {
    let endpoint = raw_endpoint.trim().trim_end_matches('/');
    if endpoint.is_empty() {
        return Err(anyhow!("empty s3 endpoint"));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(endpoint.to_string());
    }
    let scheme = if is_local_endpoint(endpoint) {
        "http"
    } else {
        "https"
    };
    Ok(format!("{scheme}://{endpoint}"))
}

pub fn build_s3_operator(cfg: &ObjectStoreConfig) -> Result<Operator> {
    {
        let guard = s3_operator_cache()
            .lock()
            .map_err(|_| anyhow!("lock s3 operator cache failed"))?;
        if let Some(op) = guard.get(cfg) {
            return Ok(op.clone());
        }
    }

    let op = build_raw_s3_operator(cfg)?;
    let mut guard = s3_operator_cache()
        .lock()
        .map_err(|_| anyhow!("lock s3 operator cache failed"))?;
    Ok(guard.entry(cfg.clone()).or_insert(op).clone())
}
