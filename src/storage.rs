use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, error};

use crate::models::{ArtifactRecord, Gender};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object already exists: {0}")]
    Conflict(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("storage rejected upload with {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("database rejected insert with {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Durable object storage keyed by name.
#[async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Stores `bytes` under `name` and returns its public locator. With
    /// `overwrite == false` an existing object makes this fail with `Conflict`.
    async fn put(&self, bytes: Bytes, name: &str, content_type: &str, overwrite: bool) -> Result<String, StorageError>;

    fn public_locator(&self, name: &str) -> String;
}

#[async_trait]
pub trait MetadataStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, record: &ArtifactRecord) -> Result<(), PersistenceError>;
}

/// Connection settings shared by both Supabase adapters.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
    pub timeout_secs: u64,
}

impl SupabaseConfig {
    fn client(&self) -> Result<Client, reqwest::Error> {
        Client::builder().timeout(Duration::from_secs(self.timeout_secs)).build()
    }

    fn base(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Supabase Storage bucket, objects kept under `{prefix}/{name}`.
#[derive(Debug)]
pub struct SupabaseArtifactStore {
    client: Client,
    config: SupabaseConfig,
    bucket: String,
    prefix: String,
}

impl SupabaseArtifactStore {
    pub fn new(config: SupabaseConfig, bucket: String, prefix: String) -> Result<Self, StorageError> {
        let client = config.client().map_err(|e| StorageError::Http(e.to_string()))?;
        Ok(Self { client, config, bucket, prefix })
    }

    fn object_path(&self, name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() { name.to_string() } else { format!("{prefix}/{name}") }
    }

    fn is_conflict(status: StatusCode, body: &str) -> bool {
        status == StatusCode::CONFLICT
            || (status == StatusCode::BAD_REQUEST && (body.contains("Duplicate") || body.contains("exists")))
    }
}

#[async_trait]
impl ArtifactStore for SupabaseArtifactStore {
    async fn put(&self, bytes: Bytes, name: &str, content_type: &str, overwrite: bool) -> Result<String, StorageError> {
        let path = self.object_path(name);
        let url = format!("{}/storage/v1/object/{}/{}", self.config.base(), self.bucket, path);
        info!("☁️ Uploading {} ({} bytes) to bucket {}", path, bytes.len(), self.bucket);

        let response = self.client
            .post(&url)
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
            .header("content-type", content_type)
            .header("x-upsert", if overwrite { "true" } else { "false" })
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ Upload of {} failed with status {}: {}", path, status, body);
            if Self::is_conflict(status, &body) {
                return Err(StorageError::Conflict(name.to_string()));
            }
            return Err(StorageError::Rejected { status: status.as_u16(), body });
        }

        Ok(self.public_locator(name))
    }

    fn public_locator(&self, name: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.config.base(), self.bucket, self.object_path(name))
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Entries kept by the in-memory stores before the oldest is evicted.
pub const DEFAULT_MEMORY_LIMIT: usize = 500;

#[derive(Debug, Default)]
struct Objects {
    by_name: HashMap<String, StoredObject>,
    order: VecDeque<String>,
}

/// In-process object store for offline runs and tests. Holds at most
/// `limit` objects, dropping the oldest upload first.
#[derive(Debug)]
pub struct MemoryArtifactStore {
    public_base: String,
    limit: usize,
    objects: RwLock<Objects>,
}

impl MemoryArtifactStore {
    #[cfg(test)]
    pub fn new(public_base: impl Into<String>) -> Self {
        Self::with_limit(public_base, DEFAULT_MEMORY_LIMIT)
    }

    pub fn with_limit(public_base: impl Into<String>, limit: usize) -> Self {
        Self { public_base: public_base.into(), limit: limit.max(1), objects: RwLock::default() }
    }

    pub fn get(&self, name: &str) -> Option<StoredObject> {
        self.objects.read().by_name.get(name).cloned()
    }

    #[cfg(test)]
    pub fn object_count(&self) -> usize {
        self.objects.read().by_name.len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, bytes: Bytes, name: &str, content_type: &str, overwrite: bool) -> Result<String, StorageError> {
        let mut guard = self.objects.write();
        let objects = &mut *guard;
        let object = StoredObject { bytes, content_type: content_type.to_string() };
        match objects.by_name.get_mut(name) {
            Some(_) if !overwrite => return Err(StorageError::Conflict(name.to_string())),
            Some(existing) => *existing = object,
            None => {
                while objects.order.len() >= self.limit {
                    if let Some(oldest) = objects.order.pop_front() {
                        info!("🧹 Evicting {} from memory store", oldest);
                        objects.by_name.remove(&oldest);
                    }
                }
                objects.order.push_back(name.to_string());
                objects.by_name.insert(name.to_string(), object);
            }
        }
        Ok(self.public_locator(name))
    }

    fn public_locator(&self, name: &str) -> String {
        format!("{}/artifacts/{}", self.public_base.trim_end_matches('/'), name)
    }
}

/// Row shape of the `messages` table.
#[derive(Debug, Serialize)]
struct MessageRow<'a> {
    message: &'a str,
    image_url: &'a str,
    category: &'a str,
    recipient: &'a str,
    gender: Gender,
    styles: String,
    #[serde(rename = "type")]
    kind: &'a str,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a ArtifactRecord> for MessageRow<'a> {
    fn from(record: &'a ArtifactRecord) -> Self {
        Self {
            message: &record.message,
            image_url: &record.locator,
            category: &record.category,
            recipient: &record.recipient,
            gender: record.gender,
            styles: record.styles.join(","),
            kind: &record.kind,
            created_at: record.created_at,
        }
    }
}

/// Inserts records through Supabase's PostgREST endpoint.
#[derive(Debug)]
pub struct SupabaseMetadataStore {
    client: Client,
    config: SupabaseConfig,
    table: String,
}

impl SupabaseMetadataStore {
    pub fn new(config: SupabaseConfig, table: String) -> Result<Self, PersistenceError> {
        let client = config.client().map_err(|e| PersistenceError::Http(e.to_string()))?;
        Ok(Self { client, config, table })
    }
}

#[async_trait]
impl MetadataStore for SupabaseMetadataStore {
    async fn insert(&self, record: &ArtifactRecord) -> Result<(), PersistenceError> {
        let url = format!("{}/rest/v1/{}", self.config.base(), self.table);
        let response = self.client
            .post(&url)
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
            .header("Prefer", "return=minimal")
            .json(&[MessageRow::from(record)])
            .send()
            .await
            .map_err(|e| PersistenceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ Insert into {} failed with status {}: {}", self.table, status, body);
            return Err(PersistenceError::Rejected { status: status.as_u16(), body });
        }
        Ok(())
    }
}

/// Keeps the most recent `limit` records in process.
#[derive(Debug, Clone)]
pub struct MemoryMetadataStore {
    limit: usize,
    records: Arc<RwLock<VecDeque<ArtifactRecord>>>,
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MEMORY_LIMIT)
    }
}

impl MemoryMetadataStore {
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: limit.max(1), records: Arc::default() }
    }

    #[cfg(test)]
    pub fn records(&self) -> Vec<ArtifactRecord> {
        self.records.read().iter().cloned().collect()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, record: &ArtifactRecord) -> Result<(), PersistenceError> {
        let mut records = self.records.write();
        if records.len() >= self.limit {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }
}
