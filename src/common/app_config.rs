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
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::fs::object_store::ObjectStoreConfig;

static CONFIG: OnceLock<InventoryAppConfig> = OnceLock::new();

const CONFIG_ENV: &str = "BUCKET_INVENTORY_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "bucket-inventory.toml";

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static InventoryAppConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = InventoryAppConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("inventory config not initialized"))
}

pub fn init_from_env_or_default() -> Result<&'static InventoryAppConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static InventoryAppConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
    if candidate.exists() {
        return Ok(candidate);
    }
    Err(anyhow!(
        "missing config file: set ${CONFIG_ENV} or create ./{DEFAULT_CONFIG_FILE}"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct InventoryAppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression, takes precedence over `log_level`.
    /// Example: "bucket_inventory=debug,opendal=warn"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub object_store: Option<ObjectStoreSection>,

    #[serde(default)]
    pub inventory: InventorySection,
}

impl InventoryAppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: InventoryAppConfig = toml::from_str(s)?;
        if cfg.inventory.batch_size == 0 {
            return Err(anyhow!("inventory.batch_size must be positive"));
        }
        Ok(cfg)
    }

    pub fn effective_log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(&self.log_level)
    }
}

impl Default for InventoryAppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            object_store: None,
            inventory: InventorySection::default(),
        }
    }
}

/// Connection settings shared by every bucket the inventory touches: the
/// manifest bucket and the destination bucket holding the shard files.
#[derive(Clone, Debug, Deserialize)]
pub struct ObjectStoreSection {
    pub endpoint: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub access_key_secret: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub enable_path_style_access: Option<bool>,
    #[serde(default)]
    pub retry_max_times: Option<usize>,
    #[serde(default)]
    pub retry_min_delay_ms: Option<u64>,
    #[serde(default)]
    pub retry_max_delay_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub io_timeout_ms: Option<u64>,
}

impl ObjectStoreSection {
    pub fn to_object_store_config(&self, bucket: &str) -> ObjectStoreConfig {
        ObjectStoreConfig {
            endpoint: self.endpoint.clone(),
            bucket: bucket.to_string(),
            root: String::new(),
            access_key_id: self.access_key_id.clone(),
            access_key_secret: self.access_key_secret.clone(),
            session_token: self.session_token.clone(),
            enable_path_style_access: self.enable_path_style_access,
            region: self.region.clone(),
            retry_max_times: self.retry_max_times,
            retry_min_delay_ms: self.retry_min_delay_ms,
            retry_max_delay_ms: self.retry_max_delay_ms,
            timeout_ms: self.timeout_ms,
            io_timeout_ms: self.io_timeout_ms,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct InventorySection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sort_files")]
    pub sort_files: bool,
    #[serde(default)]
    pub tolerate_sort_failure: bool,
    #[serde(default = "default_read_block_size")]
    pub read_block_size: usize,
}

fn default_batch_size() -> usize {
    1000
}

fn default_sort_files() -> bool {
    true
}

fn default_read_block_size() -> usize {
    crate::fs::opendal::DEFAULT_OPENDAL_READ_SIZE
}

impl Default for InventorySection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sort_files: default_sort_files(),
            tolerate_sort_failure: false,
            read_block_size: default_read_block_size(),
        }
    }
}
