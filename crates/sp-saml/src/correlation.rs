//! Correlation cache for in-flight request IDs.
//!
//! Tracks the IDs of AuthnRequests and LogoutRequests the SP has emitted,
//! keyed by an opaque per-user bucket the host supplies. Responses are
//! matched against live entries; replayed or forged `InResponseTo` values
//! find nothing. The cache is advisory: validation removes the entry in a
//! final clean-up step whether or not the checks passed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// What kind of request an entry tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// An AuthnRequest awaiting its Response.
    Authn,
    /// A LogoutRequest awaiting its LogoutResponse.
    Logout,
}

#[derive(Debug)]
struct Entry {
    id: String,
    kind: PendingKind,
    issued_at: Instant,
}

type Bucket = VecDeque<Entry>;

/// Bounded per-bucket set of issued request IDs with FIFO and TTL
/// eviction.
///
/// The bucket map is behind a reader-preference lock; each bucket has its
/// own mutex, so operations on different users never contend. No lock is
/// held across I/O.
#[derive(Debug)]
pub struct RequestCorrelationCache {
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
    max_per_bucket: usize,
    ttl: Duration,
}

/// Default cap on tracked requests per user bucket.
pub const DEFAULT_MAX_PER_BUCKET: usize = 32;

/// Default time-to-live for a pending request.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

impl Default for RequestCorrelationCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_BUCKET, DEFAULT_TTL)
    }
}

impl RequestCorrelationCache {
    /// Creates a cache with the given per-bucket cap and TTL.
    #[must_use]
    pub fn new(max_per_bucket: usize, ttl: Duration) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            max_per_bucket: max_per_bucket.max(1),
            ttl,
        }
    }

    fn bucket(&self, bucket: &str) -> Arc<Mutex<Bucket>> {
        if let Some(existing) = self.buckets.read().expect("bucket map lock").get(bucket) {
            return Arc::clone(existing);
        }
        let mut map = self.buckets.write().expect("bucket map lock");
        Arc::clone(
            map.entry(bucket.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }

    /// Entries are insertion-ordered, so expired ones sit at the front.
    fn purge_expired(&self, entries: &mut Bucket) {
        let now = Instant::now();
        while entries
            .front()
            .is_some_and(|e| now.duration_since(e.issued_at) >= self.ttl)
        {
            entries.pop_front();
        }
    }

    /// Records an issued request ID for a user bucket, evicting the oldest
    /// entry once the bucket is full.
    pub fn add(&self, bucket: &str, id: impl Into<String>, kind: PendingKind) {
        let bucket = self.bucket(bucket);
        let mut entries = bucket.lock().expect("bucket lock");
        self.purge_expired(&mut entries);
        if entries.len() >= self.max_per_bucket {
            entries.pop_front();
        }
        entries.push_back(Entry {
            id: id.into(),
            kind,
            issued_at: Instant::now(),
        });
    }

    /// Removes an ID from a bucket; reports whether it was present.
    pub fn remove(&self, bucket: &str, id: &str) -> bool {
        let bucket = self.bucket(bucket);
        let mut entries = bucket.lock().expect("bucket lock");
        self.purge_expired(&mut entries);
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() < before
    }

    /// True when the ID is live in the bucket.
    pub fn contains(&self, bucket: &str, id: &str) -> bool {
        let bucket = self.bucket(bucket);
        let mut entries = bucket.lock().expect("bucket lock");
        self.purge_expired(&mut entries);
        entries.iter().any(|e| e.id == id)
    }

    /// The kind recorded for a live ID, when present.
    pub fn kind_of(&self, bucket: &str, id: &str) -> Option<PendingKind> {
        let bucket = self.bucket(bucket);
        let mut entries = bucket.lock().expect("bucket lock");
        self.purge_expired(&mut entries);
        entries.iter().find(|e| e.id == id).map(|e| e.kind)
    }

    /// Number of live entries in a bucket.
    pub fn len(&self, bucket: &str) -> usize {
        let bucket = self.bucket(bucket);
        let mut entries = bucket.lock().expect("bucket lock");
        self.purge_expired(&mut entries);
        entries.len()
    }

    /// True when a bucket has no live entries.
    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }
}
