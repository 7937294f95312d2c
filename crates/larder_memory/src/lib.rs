// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Heap storage for larder cache regions.
//!
//! [`HeapProvider`] keeps values in process memory using moka's concurrent
//! cache, so capacity bounds evict with the `TinyLFU` policy. Configure it
//! through [`HeapProviderBuilder`]; moka's own types never show up in the
//! public API.
//!
//! ```
//! use larder_memory::HeapProvider;
//! use larder_provider::CacheProvider;
//! use std::time::Duration;
//!
//! # futures::executor::block_on(async {
//! let provider = HeapProvider::<String, u64>::builder()
//!     .max_capacity(1000)
//!     .time_to_live(Duration::from_secs(300))
//!     .build();
//!
//! provider.put(&"answer".to_string(), 42).await.unwrap();
//! assert_eq!(provider.get(&"answer".to_string()).await.unwrap(), Some(42));
//! # });
//! ```

pub mod builder;
pub mod provider;

#[doc(inline)]
pub use builder::{EvictionCause, HeapProviderBuilder};
#[doc(inline)]
pub use provider::HeapProvider;
