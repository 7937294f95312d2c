// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Storage contract for larder cache regions.
//!
//! A cache region never talks to its storage directly. It goes through a
//! [`CacheProvider`], which may keep entries on the heap, on a local disk, or in
//! a distributed cache cluster. The region layers concurrency strategies,
//! expiration, timeouts and statistics on top; the provider only stores values.
//!
//! # Implementing a Provider
//!
//! ```
//! use larder_provider::{CacheProvider, Error};
//! use std::collections::HashMap;
//! use std::sync::RwLock;
//!
//! struct MapProvider<K, V>(RwLock<HashMap<K, V>>);
//!
//! impl<K, V> CacheProvider<K, V> for MapProvider<K, V>
//! where
//!     K: Clone + Eq + std::hash::Hash + Send + Sync,
//!     V: Clone + Send + Sync,
//! {
//!     async fn get(&self, key: &K) -> Result<Option<V>, Error> {
//!         Ok(self.0.read().unwrap().get(key).cloned())
//!     }
//!
//!     async fn put(&self, key: &K, value: V) -> Result<(), Error> {
//!         self.0.write().unwrap().insert(key.clone(), value);
//!         Ok(())
//!     }
//!
//!     async fn remove(&self, key: &K) -> Result<(), Error> {
//!         self.0.write().unwrap().remove(key);
//!         Ok(())
//!     }
//!
//!     async fn clear(&self) -> Result<(), Error> {
//!         self.0.write().unwrap().clear();
//!         Ok(())
//!     }
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! The `dynamic-provider` feature (on by default) adds [`DynamicProvider`], a
//! clonable type-erased provider. Regions configured with different storage
//! backends share one region type through it.

pub mod error;
pub(crate) mod provider;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[cfg(any(test, feature = "dynamic-provider"))]
mod dynamic;

#[cfg(any(test, feature = "dynamic-provider"))]
#[doc(inline)]
pub use dynamic::{DynamicProvider, DynamicProviderExt};
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use provider::CacheProvider;
