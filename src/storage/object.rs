//! HTTP object storage driver shared by the S3 and Tencent COS backends.
//!
//! # Responsibilities
//! - Validate backend parameters at construction
//! - Resolve bucket and object URLs (path-style or virtual-hosted)
//! - Map PUT/GET/HEAD/DELETE and ListObjectsV2 onto [`Storage`]
//!
//! Requests are sent unsigned. The secret keys are required at construction
//! but never used, so these backends do not work against private buckets
//! yet: such a bucket answers 403 and plugin launch fails on the first
//! listing. Use them only with a bucket policy or gateway that authorizes
//! this node without signatures.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::config::{S3StorageConfig, TencentCosConfig};
use crate::storage::{observe, validate_key, Storage, StorageError, StorageKind};

/// How the node is authorized against the bucket.
#[derive(Clone, PartialEq, Eq)]
pub enum ObjectAuth {
    StaticKey { key_id: String },
    ManagedIdentity,
}

impl fmt::Debug for ObjectAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectAuth::StaticKey { key_id } => {
                let visible: String = key_id.chars().take(4).collect();
                write!(f, "StaticKey({visible}…)")
            }
            ObjectAuth::ManagedIdentity => f.write_str("ManagedIdentity"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    kind: StorageKind,
    client: Client,
    bucket_url: Url,
    auth: ObjectAuth,
}

impl ObjectStore {
    /// S3 or S3-compatible storage.
    pub fn s3(config: &S3StorageConfig, bucket: &str) -> Result<Self, StorageError> {
        let kind = StorageKind::AwsS3;
        require(kind, "bucket", bucket)?;
        require(kind, "region", &config.region)?;

        let auth = if config.use_aws_managed_iam {
            ObjectAuth::ManagedIdentity
        } else {
            require(kind, "access_key", &config.access_key)?;
            require(kind, "secret_key", &config.secret_key)?;
            ObjectAuth::StaticKey {
                key_id: config.access_key.clone(),
            }
        };

        let endpoint = match &config.endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => endpoint.clone(),
            _ => format!("https://s3.{}.amazonaws.com", config.region),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| StorageError::invalid(kind, format!("endpoint '{endpoint}': {e}")))?;

        let bucket_url = bucket_url(kind, &endpoint, bucket, config.use_path_style)?;
        Self::build(kind, bucket_url, auth)
    }

    /// Tencent Cloud Object Storage; always virtual-hosted.
    pub fn tencent_cos(config: &TencentCosConfig, bucket: &str) -> Result<Self, StorageError> {
        let kind = StorageKind::TencentCos;
        require(kind, "bucket", bucket)?;
        require(kind, "region", &config.region)?;
        require(kind, "secret_id", &config.secret_id)?;
        require(kind, "secret_key", &config.secret_key)?;

        let raw = format!("https://{bucket}.cos.{}.myqcloud.com/", config.region);
        let bucket_url = Url::parse(&raw)
            .map_err(|e| StorageError::invalid(kind, format!("endpoint '{raw}': {e}")))?;

        Self::build(
            kind,
            bucket_url,
            ObjectAuth::StaticKey {
                key_id: config.secret_id.clone(),
            },
        )
    }

    fn build(kind: StorageKind, bucket_url: Url, auth: ObjectAuth) -> Result<Self, StorageError> {
        let client = Client::builder()
            .build()
            .map_err(|e| StorageError::invalid(kind, format!("http client: {e}")))?;

        Ok(Self {
            kind,
            client,
            bucket_url,
            auth,
        })
    }

    pub fn bucket_url(&self) -> &Url {
        &self.bucket_url
    }

    pub fn auth(&self) -> &ObjectAuth {
        &self.auth
    }

    /// URL of a single object.
    pub fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        validate_key(key)?;
        let mut url = self.bucket_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidKey(key.to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }

    async fn save_inner(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let response = self
            .client
            .put(self.object_url(key)?)
            .body(data.to_vec())
            .send()
            .await?;
        check(response.status(), key)
    }

    async fn load_inner(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.client.get(self.object_url(key)?).send().await?;
        check(response.status(), key)?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn exists_inner(&self, key: &str) -> Result<bool, StorageError> {
        let response = self.client.head(self.object_url(key)?).send().await?;
        match check(response.status(), key) {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_inner(&self, key: &str) -> Result<(), StorageError> {
        let response = self.client.delete(self.object_url(key)?).send().await?;
        check(response.status(), key)
    }

    async fn list_inner(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut url = self.bucket_url.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("list-type", "2").append_pair("prefix", prefix);
                if let Some(token) = &token {
                    query.append_pair("continuation-token", token);
                }
            }

            let response = self.client.get(url).send().await?;
            check(response.status(), prefix)?;
            let body = response.text().await?;

            keys.extend(xml_values(&body, "Key"));
            token = match xml_values(&body, "IsTruncated").first().map(String::as_str) {
                Some("true") => xml_values(&body, "NextContinuationToken").into_iter().next(),
                _ => None,
            };
            if token.is_none() {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl Storage for ObjectStore {
    fn kind(&self) -> StorageKind {
        self.kind
    }

    async fn save(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        observe(self.kind, "save", self.save_inner(key, data).await)
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        observe(self.kind, "load", self.load_inner(key).await)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        observe(self.kind, "exists", self.exists_inner(key).await)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        observe(self.kind, "delete", self.delete_inner(key).await)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        observe(self.kind, "list", self.list_inner(prefix).await)
    }
}

fn require(kind: StorageKind, field: &str, value: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        Err(StorageError::invalid(kind, format!("{field} is required")))
    } else {
        Ok(())
    }
}

fn bucket_url(
    kind: StorageKind,
    endpoint: &Url,
    bucket: &str,
    path_style: bool,
) -> Result<Url, StorageError> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| StorageError::invalid(kind, "endpoint has no host"))?;
    let port = endpoint.port().map(|p| format!(":{p}")).unwrap_or_default();

    let raw = if path_style {
        format!("{}://{host}{port}/{bucket}/", endpoint.scheme())
    } else {
        format!("{}://{bucket}.{host}{port}/", endpoint.scheme())
    };
    Url::parse(&raw).map_err(|e| StorageError::invalid(kind, format!("bucket url '{raw}': {e}")))
}

fn check(status: StatusCode, key: &str) -> Result<(), StorageError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(StorageError::NotFound(key.to_string()))
    } else {
        Err(StorageError::Status {
            status: status.as_u16(),
            key: key.to_string(),
        })
    }
}

/// Text of every `<tag>…</tag>` element, entity-decoded.
fn xml_values(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut values = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        values.push(
            after[..end]
                .replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&quot;", "\"")
                .replace("&apos;", "'")
                .replace("&amp;", "&"),
        );
        rest = &after[end + close.len()..];
    }
    values
}
