//! Memory entry types for the Strata system
//!
//! Defines the universal record that flows through every storage tier,
//! its metadata, and the tier enum used by the migration policy.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, StrataError};

/// A single record stored in one of the Strata tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Lookup key, unique per namespace and tier
    pub key: String,
    /// Opaque payload: a JSON string for text, any JSON value for structured data
    content: Value,
    /// Bookkeeping shared by every tier
    pub metadata: MemoryMetadata,
    /// Optional fixed-dimensionality vector used by the cold tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Metadata tracked alongside every entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    /// Number of successful reads
    pub access_count: u64,
    pub tier: StorageTier,
    /// Time-based expiry in seconds; zero or negative disables it
    pub ttl_seconds: i64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub source: String,
    /// SHA-256 of the canonical JSON encoding of the content
    pub content_hash: String,
}

impl MemoryEntry {
    /// Create a new HOT entry with no expiry.
    pub fn new(key: impl Into<String>, content: impl Into<Value>) -> Self {
        let content = content.into();
        let now = Utc::now();
        Self {
            key: key.into(),
            metadata: MemoryMetadata {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                accessed_at: now,
                access_count: 0,
                tier: StorageTier::Hot,
                ttl_seconds: 0,
                tags: BTreeSet::new(),
                source: String::new(),
                content_hash: content_hash(&content),
            },
            content,
            embedding: None,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: i64) -> Self {
        self.metadata.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = source.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_tier(mut self, tier: StorageTier) -> Self {
        self.metadata.tier = tier;
        self
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Replace the payload. The content hash and `updated_at` follow.
    pub fn set_content(&mut self, content: impl Into<Value>) {
        self.content = content.into();
        self.metadata.content_hash = content_hash(&self.content);
        self.metadata.updated_at = Utc::now();
    }

    /// Text view of the content: the string itself for text payloads,
    /// the JSON encoding otherwise.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Lowercased text used for substring search in the hot and warm tiers.
    pub fn searchable_text(&self) -> String {
        let mut text = self.content_text().to_lowercase();
        for tag in &self.metadata.tags {
            text.push(' ');
            text.push_str(&tag.to_lowercase());
        }
        if !self.metadata.source.is_empty() {
            text.push(' ');
            text.push_str(&self.metadata.source.to_lowercase());
        }
        text
    }

    /// Record a successful read.
    pub fn mark_accessed(&mut self) {
        self.metadata.access_count += 1;
        self.metadata.accessed_at = Utc::now();
    }

    /// True when the stored hash still matches the payload.
    pub fn verify_integrity(&self) -> bool {
        self.metadata.content_hash == content_hash(&self.content)
    }

    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired_at(Utc::now())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            StrataError::SerializationFailure(format!("Failed to encode entry {}: {e}", self.key))
        })
    }

    /// Decode an entry. The stored hash is kept as-is; a payload edited out
    /// of band shows up through `verify_integrity`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| StrataError::SerializationFailure(format!("Failed to decode entry: {e}")))
    }
}

impl MemoryMetadata {
    /// `created_at + ttl_seconds`, or `None` when time-based expiry is off.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        (self.ttl_seconds > 0).then(|| self.created_at + Duration::seconds(self.ttl_seconds))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| now >= expires)
    }

    /// Seconds left before expiry, used for server-side TTLs.
    /// `None` when the entry never expires; `Some(0)` when already expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<u64> {
        self.expires_at()
            .map(|expires| (expires - now).num_seconds().max(0) as u64)
    }

    /// Time since the last successful read (or creation).
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.accessed_at).max(Duration::zero())
    }
}

/// Fingerprint of a payload. Map keys are ordered by `serde_json`, so equal
/// values hash equally regardless of insertion order.
pub fn content_hash(content: &Value) -> String {
    let bytes = serde_json::to_vec(content).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

/// Storage tier, ordered from fastest to most durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageTier {
    /// Pooled key-value store, short-lived data
    Hot,
    /// Document store with filtered queries
    Warm,
    /// Vector-similarity store
    Cold,
}

impl StorageTier {
    pub const ALL: [StorageTier; 3] = [StorageTier::Hot, StorageTier::Warm, StorageTier::Cold];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Hot => "HOT",
            StorageTier::Warm => "WARM",
            StorageTier::Cold => "COLD",
        }
    }

    /// Next tier in the automatic migration direction.
    pub fn colder(&self) -> Option<StorageTier> {
        match self {
            StorageTier::Hot => Some(StorageTier::Warm),
            StorageTier::Warm => Some(StorageTier::Cold),
            StorageTier::Cold => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "HOT" => Ok(StorageTier::Hot),
            "WARM" => Ok(StorageTier::Warm),
            "COLD" => Ok(StorageTier::Cold),
            other => Err(StrataError::SerializationFailure(format!(
                "Unknown storage tier: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for StorageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_serialization_roundtrip() {
        let entry = MemoryEntry::new("turn:1", json!({"role": "user", "text": "hello"}))
            .with_tags(["chat", "user"])
            .with_source("conversation")
            .with_embedding(vec![0.1; 8])
            .with_ttl(60);

        let bytes = entry.to_bytes().expect("Failed to serialize entry");
        let decoded = MemoryEntry::from_bytes(&bytes).expect("Failed to deserialize entry");

        assert_eq!(decoded.content(), entry.content());
        assert_eq!(decoded.metadata.content_hash, entry.metadata.content_hash);
        assert_eq!(decoded.metadata.tags, entry.metadata.tags);
        assert_eq!(decoded.embedding, entry.embedding);
        assert!(decoded.verify_integrity());
    }

    #[test]
    fn test_new_entry_defaults() {
        let entry = MemoryEntry::new("k", "text payload");
        assert_eq!(entry.metadata.access_count, 0);
        assert_eq!(entry.metadata.tier, StorageTier::Hot);
        assert_eq!(entry.metadata.ttl_seconds, 0);
        assert!(entry.metadata.tags.is_empty());
        assert!(entry.embedding.is_none());
        assert!(entry.metadata.expires_at().is_none());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_set_content_recomputes_hash() {
        let mut entry = MemoryEntry::new("k", "first");
        let before = entry.metadata.content_hash.clone();

        entry.set_content("second");

        assert_ne!(entry.metadata.content_hash, before);
        assert_eq!(entry.metadata.content_hash, content_hash(&json!("second")));
        assert!(entry.verify_integrity());
    }

    #[test]
    fn test_content_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_tampered_payload_fails_integrity() {
        let entry = MemoryEntry::new("k", "original");
        let mut raw: Value = serde_json::from_slice(&entry.to_bytes().unwrap()).unwrap();
        raw["content"] = json!("tampered");
        let decoded = MemoryEntry::from_bytes(&serde_json::to_vec(&raw).unwrap()).unwrap();
        assert!(!decoded.verify_integrity());
    }

    #[test]
    fn test_mark_accessed() {
        let mut entry = MemoryEntry::new("k", "v");
        let before = entry.metadata.accessed_at;
        entry.mark_accessed();
        entry.mark_accessed();
        assert_eq!(entry.metadata.access_count, 2);
        assert!(entry.metadata.accessed_at >= before);
    }

    #[test]
    fn test_expiry() {
        let mut entry = MemoryEntry::new("k", "v").with_ttl(10);
        entry.metadata.created_at = Utc::now() - Duration::seconds(11);
        assert!(entry.is_expired());

        let fresh = MemoryEntry::new("k", "v").with_ttl(10);
        assert!(!fresh.is_expired());
        assert!(fresh.metadata.remaining_ttl(Utc::now()).unwrap() <= 10);

        let mut never = MemoryEntry::new("k", "v").with_ttl(-5);
        never.metadata.created_at = Utc::now() - Duration::days(365);
        assert!(!never.is_expired());
        assert!(never.metadata.remaining_ttl(Utc::now()).is_none());
    }

    #[test]
    fn test_searchable_text_includes_tags_and_source() {
        let entry = MemoryEntry::new("k", "Hello World")
            .with_tags(["Greeting"])
            .with_source("Manual");
        let text = entry.searchable_text();
        assert!(text.contains("hello world"));
        assert!(text.contains("greeting"));
        assert!(text.contains("manual"));
    }

    #[test]
    fn test_storage_tier_serialization() {
        for tier in StorageTier::ALL {
            let json = serde_json::to_string(&tier).expect("Failed to serialize");
            assert_eq!(json, format!("\"{}\"", tier.as_str()));
            let deserialized: StorageTier =
                serde_json::from_str(&json).expect("Failed to deserialize");
            assert_eq!(tier, deserialized);
            assert_eq!(StorageTier::parse(tier.as_str()).unwrap(), tier);
        }
        assert!(StorageTier::parse("LUKEWARM").is_err());
    }

    #[test]
    fn test_tier_direction() {
        assert_eq!(StorageTier::Hot.colder(), Some(StorageTier::Warm));
        assert_eq!(StorageTier::Warm.colder(), Some(StorageTier::Cold));
        assert_eq!(StorageTier::Cold.colder(), None);
        assert!(StorageTier::Hot < StorageTier::Cold);
    }
}
