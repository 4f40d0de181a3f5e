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
//! Inventory manifest: the JSON document listing the shard files of one
//! inventory run.

use serde::Deserialize;

use crate::common::error::{InventoryError, Result};
use crate::common::logging::debug;
use crate::formats::InventoryFormat;
use crate::fs::opendal::ObjectStore;
use crate::fs::path::parse_object_url;

const ARN_PREFIX: &str = "arn";
const ARN_SECTIONS: usize = 6;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct InventoryFile {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "MD5checksum")]
    pub md5_checksum: Option<String>,
}

/// Wire shape of `manifest.json`. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(rename = "destinationBucket", default)]
    destination_bucket: String,
    #[serde(rename = "sourceBucket", default)]
    source_bucket: String,
    #[serde(default)]
    files: Vec<InventoryFile>,
    #[serde(rename = "fileFormat", default)]
    file_format: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    /// The URL the manifest was loaded from.
    pub url: String,
    /// ARN of the bucket holding the shard files, as written in the manifest.
    pub inventory_bucket_arn: String,
    /// Plain bucket name taken from the ARN resource.
    pub inventory_bucket: String,
    pub source_bucket: String,
    pub format: InventoryFormat,
    pub files: Vec<InventoryFile>,
}

impl Manifest {
    /// Same manifest with the shard list replaced.
    pub fn with_files(&self, files: Vec<InventoryFile>) -> Self {
        Self {
            files,
            ..self.clone()
        }
    }
}

pub fn load_manifest(url: &str, store: &ObjectStore) -> Result<Manifest> {
    let location = parse_object_url(url).map_err(|message| InventoryError::InvalidUrl {
        url: url.to_string(),
        message,
    })?;
    let body = store
        .get_object(&location.bucket, &location.key)
        .map_err(|e| InventoryError::fetch(location.to_string(), &e))?;
    let manifest = parse_manifest(url, &body)?;
    debug!(
        "loaded inventory manifest: url={} format={} files={} inventory_bucket={}",
        manifest.url,
        manifest.format,
        manifest.files.len(),
        manifest.inventory_bucket
    );
    Ok(manifest)
}

/// Decodes and validates manifest bytes fetched from `url`.
pub fn parse_manifest(url: &str, body: &[u8]) -> Result<Manifest> {
    let raw: RawManifest = serde_json::from_slice(body).map_err(|e| InventoryError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let format = InventoryFormat::from_manifest_value(&raw.file_format).ok_or_else(|| {
        InventoryError::UnsupportedFormat {
            format: raw.file_format.clone(),
        }
    })?;
    let inventory_bucket = bucket_from_arn(&raw.destination_bucket)?;
    Ok(Manifest {
        url: url.to_string(),
        inventory_bucket_arn: raw.destination_bucket,
        inventory_bucket,
        source_bucket: raw.source_bucket,
        format,
        files: raw.files,
    })
}

/// `arn:partition:service:region:account:resource`; for S3 buckets the
/// resource is the bucket name.
fn bucket_from_arn(arn: &str) -> Result<String> {
    let malformed = |message: &str| InventoryError::MalformedDestination {
        arn: arn.to_string(),
        message: message.to_string(),
    };
    let sections: Vec<&str> = arn.splitn(ARN_SECTIONS, ':').collect();
    if sections.first() != Some(&ARN_PREFIX) {
        return Err(malformed("arn: invalid prefix"));
    }
    if sections.len() != ARN_SECTIONS {
        return Err(malformed("arn: not enough sections"));
    }
    let resource = sections[ARN_SECTIONS - 1];
    if resource.is_empty() {
        return Err(malformed("arn: empty resource"));
    }
    Ok(resource.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "s3://inventory-bucket/source/daily/2024-03-07T00-00Z/manifest.json";

    fn manifest_json(format: &str, arn: &str) -> String {
        format!(
            r#"{{
                "sourceBucket": "example-source-bucket",
                "destinationBucket": "{arn}",
                "version": "2016-11-30",
                "creationTimestamp": "1514944800000",
                "fileFormat": "{format}",
                "fileSchema": "message s3.inventory {{ required binary bucket (UTF8); }}",
                "files": [
                    {{"key": "inv/data/a.parquet", "size": 56291, "MD5checksum": "5ab0d2a4"}},
                    {{"key": "inv/data/b.parquet"}}
                ]
            }}"#
        )
    }

    #[test]
    fn parses_manifest_and_destination_bucket() {
        let body = manifest_json("Parquet", "arn:aws:s3:::example-inventory-destination");
        let m = parse_manifest(URL, body.as_bytes()).expect("parse manifest");
        assert_eq!(m.url, URL);
        assert_eq!(m.format, InventoryFormat::Parquet);
        assert_eq!(m.source_bucket, "example-source-bucket");
        assert_eq!(m.inventory_bucket, "example-inventory-destination");
        assert_eq!(m.files.len(), 2);
        assert_eq!(m.files[0].size, Some(56291));
        assert_eq!(m.files[0].md5_checksum.as_deref(), Some("5ab0d2a4"));
        assert_eq!(m.files[1].size, None);
    }

    #[test]
    fn rejects_unknown_format() {
        let body = manifest_json("CSV", "arn:aws:s3:::dest");
        let err = parse_manifest(URL, body.as_bytes()).expect_err("csv");
        assert!(matches!(err, InventoryError::UnsupportedFormat { ref format } if format == "CSV"));
    }

    #[test]
    fn format_literal_is_case_sensitive() {
        let body = manifest_json("parquet", "arn:aws:s3:::dest");
        assert!(matches!(
            parse_manifest(URL, body.as_bytes()),
            Err(InventoryError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn rejects_malformed_destination() {
        for arn in ["example-bucket", "arn:aws:s3", "arn:aws:s3:::", "xrn:aws:s3:::b"] {
            let body = manifest_json("ORC", arn);
            let err = parse_manifest(URL, body.as_bytes()).expect_err(arn);
            assert!(
                matches!(err, InventoryError::MalformedDestination { .. }),
                "{arn}: {err}"
            );
        }
    }

    #[test]
    fn resource_keeps_colons_after_fifth_separator() {
        assert_eq!(
            bucket_from_arn("arn:aws:s3:eu-west-1:123456789012:bucket:extra").expect("arn"),
            "bucket:extra"
        );
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        let err = parse_manifest(URL, b"{not json").expect_err("bad json");
        assert!(matches!(err, InventoryError::Decode { .. }));
    }

    #[test]
    fn load_rejects_non_s3_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ObjectStore::local(dir.path()).expect("local store");
        let err = load_manifest("https://example.com/manifest.json", &store).expect_err("url");
        assert!(matches!(err, InventoryError::InvalidUrl { .. }));
    }

    #[test]
    fn load_reports_missing_manifest_as_fetch_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("inventory-bucket")).expect("bucket dir");
        let store = ObjectStore::local(dir.path()).expect("local store");
        let err = load_manifest(URL, &store).expect_err("missing");
        assert!(matches!(err, InventoryError::Fetch { .. }));
    }
}
