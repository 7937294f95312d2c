// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory durable store for driving units of work.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use larder::{CacheKey, DurableStore, Error, QueryCacheKey, Result, Version, Versioned};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub name: String,
    pub price: u32,
}

pub fn product(name: &str, price: u32) -> Product {
    Product {
        name: name.to_owned(),
        price,
    }
}

/// Rows keyed by cache key, with optimistic version checks on save.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Arc<Mutex<HashMap<CacheKey, Versioned<Product>>>>,
    queries: Arc<Mutex<HashMap<QueryCacheKey, Vec<CacheKey>>>>,
    loads: Arc<AtomicUsize>,
    query_runs: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &CacheKey, snapshot: Product, version: Version) {
        self.rows.lock().insert(key.clone(), Versioned { snapshot, version });
    }

    pub fn row(&self, key: &CacheKey) -> Option<Versioned<Product>> {
        self.rows.lock().get(key).cloned()
    }

    /// Answers `query` with `ids` from now on.
    pub fn answer(&self, query: &QueryCacheKey, ids: Vec<CacheKey>) {
        self.queries.lock().insert(query.clone(), ids);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn query_runs(&self) -> usize {
        self.query_runs.load(Ordering::Relaxed)
    }
}

impl DurableStore<Product> for MemoryStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<Versioned<Product>>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.row(key))
    }

    async fn save(&self, key: &CacheKey, snapshot: &Product, expected: Option<Version>) -> Result<Version> {
        let mut rows = self.rows.lock();
        let current = rows.get(key).map(|row| row.version);
        if current != expected {
            return Err(Error::optimistic_conflict(format!("{key} is at {current:?}, not {expected:?}")));
        }

        let version = current.map_or(Version(0), Version::next);
        rows.insert(
            key.clone(),
            Versioned {
                snapshot: snapshot.clone(),
                version,
            },
        );
        Ok(version)
    }

    async fn query(&self, query: &QueryCacheKey) -> Result<Vec<CacheKey>> {
        self.query_runs.fetch_add(1, Ordering::Relaxed);
        Ok(self.queries.lock().get(query).cloned().unwrap_or_default())
    }
}
