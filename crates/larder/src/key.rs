// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Keys for cached objects and cached queries.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// The identifier of one persistent object within its entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    /// A numeric primary key.
    Int(i64),
    /// A textual or composite primary key.
    Text(Arc<str>),
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Identifier {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::Text(Arc::from(value))
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self::Text(Arc::from(value))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Identifies one logical object across every cache tier.
///
/// Equality is by value: two keys built from the same entity name and
/// identifier are interchangeable.
///
/// ```
/// use larder::CacheKey;
///
/// let key = CacheKey::new("Product", 1);
/// assert_eq!(key, CacheKey::new("Product", 1));
/// assert_eq!(key.to_string(), "Product#1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    entity: Arc<str>,
    id: Identifier,
}

impl CacheKey {
    /// Creates a key for the object `id` of type `entity`.
    #[must_use]
    pub fn new(entity: impl Into<Arc<str>>, id: impl Into<Identifier>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// The entity type name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// The identifier within the entity type.
    #[must_use]
    pub fn id(&self) -> &Identifier {
        &self.id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// A bound query parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryParam {
    /// SQL `NULL` or an absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A string.
    Text(Arc<str>),
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Text(Arc::from(value))
    }
}

impl<T: Into<Self>> From<Option<T>> for QueryParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Identifies one cached query result.
///
/// Besides the normalized query text and its parameters, the key names every
/// region whose writes make the result stale. Dependent regions are kept
/// sorted, so declaration order does not change the key.
///
/// ```
/// use larder::QueryCacheKey;
///
/// let key = QueryCacheKey::new("select id from product where price < ?")
///     .param(20_i64)
///     .depends_on("Product");
/// assert!(key.dependent_regions().any(|region| region == "Product"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    signature: Arc<str>,
    parameters: Vec<QueryParam>,
    dependent_regions: BTreeSet<Arc<str>>,
}

impl QueryCacheKey {
    /// Creates a key for a query without parameters or dependencies.
    #[must_use]
    pub fn new(signature: impl Into<Arc<str>>) -> Self {
        Self {
            signature: signature.into(),
            parameters: Vec::new(),
            dependent_regions: BTreeSet::new(),
        }
    }

    /// Appends a bound parameter.
    #[must_use]
    pub fn param(mut self, value: impl Into<QueryParam>) -> Self {
        self.parameters.push(value.into());
        self
    }

    /// Declares that writes to `region` invalidate this query.
    #[must_use]
    pub fn depends_on(mut self, region: impl Into<Arc<str>>) -> Self {
        self.dependent_regions.insert(region.into());
        self
    }

    /// The normalized query text.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Bound parameters in order.
    #[must_use]
    pub fn parameters(&self) -> &[QueryParam] {
        &self.parameters
    }

    /// Regions whose writes invalidate this query, in name order.
    pub fn dependent_regions(&self) -> impl Iterator<Item = &str> {
        self.dependent_regions.iter().map(AsRef::as_ref)
    }
}

impl fmt::Display for QueryCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.signature, self.parameters)
    }
}

/// The key type every provider stores entries under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegionKey {
    /// An object entry.
    Object(CacheKey),
    /// A query result entry.
    Query(QueryCacheKey),
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(key) => key.fmt(f),
            Self::Query(key) => key.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use super::*;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn identifiers_compare_by_value() {
        assert_eq!(Identifier::from("FR"), Identifier::from("FR".to_string()));
        assert_eq!(Identifier::from(7_i32), Identifier::Int(7));
        assert_ne!(CacheKey::new("Product", 1), CacheKey::new("Order", 1));
    }

    #[test]
    fn dependency_order_does_not_change_query_key() {
        let first = QueryCacheKey::new("q").depends_on("Product").depends_on("Order");
        let second = QueryCacheKey::new("q").depends_on("Order").depends_on("Product");
        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));
        assert_eq!(first.dependent_regions().collect::<Vec<_>>(), ["Order", "Product"]);
    }

    #[test]
    fn parameters_distinguish_queries() {
        let cheap = QueryCacheKey::new("q").param(10_i64);
        let dear = QueryCacheKey::new("q").param(20_i64);
        assert_ne!(cheap, dear);
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(true)), QueryParam::Bool(true));
    }

    #[test]
    fn display_formats() {
        assert_eq!(CacheKey::new("Country", "FR").to_string(), "Country#FR");
        let region_key = RegionKey::Object(CacheKey::new("Product", 2));
        assert_eq!(region_key.to_string(), "Product#2");
    }
}
