//! Defines the [`KvStore`] trait, the narrow capability everything else in
//! this crate performs its I/O through.
//!
//! The store is assumed to offer only single-row conditional writes, scans and
//! batched point reads. There are no transactions and no leases, mutual
//! exclusion is built on top by the [locking][crate::locking] module.

mod memory;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use memory::Operation;
pub use memory::OperationKind;

/// Attribute name of the partition key as seen by expression based backends.
pub const KEY_ATTRIBUTE: &str = "key";

/// Non-key attributes of a row. All values are strings.
pub type Attributes = BTreeMap<String, String>;

/// A row as returned by the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub attributes: Attributes,
}

impl Row {
    pub fn new(key: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            key: key.into(),
            attributes,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Precondition a conditional write or delete is predicated on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    AttributeEquals { name: String, value: String },
    AttributeExists(String),
    AttributeNotExists(String),
}

impl Condition {
    pub fn attribute_equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Condition::AttributeEquals {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Evaluates the condition against the current image of a row, `None`
    /// meaning the row does not exist.
    pub fn holds_for(&self, row: Option<&Attributes>) -> bool {
        match self {
            Condition::AttributeEquals { name, value } => {
                row.and_then(|r| r.get(name)).map_or(false, |v| v == value)
            }
            Condition::AttributeExists(name) => row.map_or(false, |r| r.contains_key(name)),
            Condition::AttributeNotExists(name) => !row.map_or(false, |r| r.contains_key(name)),
        }
    }
}

/// What a delete removes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteScope {
    /// The entire row.
    Row,
    /// Only the named attributes. Removing the last attribute removes the row.
    Attributes(Vec<String>),
}

impl DeleteScope {
    pub fn attribute(name: impl Into<String>) -> Self {
        DeleteScope::Attributes(vec![name.into()])
    }
}

#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    ConditionFailed,
}

#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The delete was performed. Carries the row as it was before the delete,
    /// if there was one.
    Deleted(Option<Row>),
    ConditionFailed,
}

/// Conjunction of attribute equalities a scan is filtered by.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    equalities: Vec<(String, String)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn where_eq(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.equalities.push((name.into(), value.into()));
        self
    }

    pub fn equalities(&self) -> &[(String, String)] {
        &self.equalities
    }

    /// Renders the filter as `#n0 = :v0 AND #n1 = :v1 ...` together with the
    /// name and value placeholders it references.
    ///
    /// Placeholders are used for names as well because some attribute names
    /// (e.g. `location`) are reserved words in expression languages.
    pub fn expression(&self) -> (String, HashMap<String, String>, HashMap<String, String>) {
        let mut names = HashMap::new();
        let mut values = HashMap::new();

        let clauses = self
            .equalities
            .iter()
            .enumerate()
            .map(|(i, (name, value))| {
                let n = format!("#n{}", i);
                let v = format!(":v{}", i);

                names.insert(n.clone(), name.clone());
                values.insert(v.clone(), value.clone());

                format!("{} = {}", n, v)
            })
            .collect::<Vec<_>>();

        (clauses.join(" AND "), names, values)
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.equalities
            .iter()
            .all(|(name, value)| row.get(name) == Some(value.as_str()))
    }
}

/// A key-value table store offering single-row conditional writes.
///
/// Implementations must not retry on their own. Only the caller knows which
/// failures are safe to retry.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Merges `attributes` into the row at `key`, creating it if necessary.
    async fn put(
        &self,
        table: &str,
        key: &str,
        attributes: Attributes,
        condition: Option<Condition>,
    ) -> Result<PutOutcome, StoreError>;

    async fn delete(
        &self,
        table: &str,
        key: &str,
        scope: DeleteScope,
        condition: Option<Condition>,
    ) -> Result<DeleteOutcome, StoreError>;

    /// Returns all rows matching `filter`.
    ///
    /// The stream is lazy and finite and cannot be restarted once it has
    /// yielded an error.
    async fn scan(
        &self,
        table: &str,
        filter: &Filter,
    ) -> Result<BoxStream<'static, Result<Row, StoreError>>, StoreError>;

    /// Reads the given rows. Keys without a row are absent from the result.
    async fn batch_get(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Row>, StoreError>;
}

#[async_trait]
impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    async fn put(
        &self,
        table: &str,
        key: &str,
        attributes: Attributes,
        condition: Option<Condition>,
    ) -> Result<PutOutcome, StoreError> {
        (**self).put(table, key, attributes, condition).await
    }

    async fn delete(
        &self,
        table: &str,
        key: &str,
        scope: DeleteScope,
        condition: Option<Condition>,
    ) -> Result<DeleteOutcome, StoreError> {
        (**self).delete(table, key, scope, condition).await
    }

    async fn scan(
        &self,
        table: &str,
        filter: &Filter,
    ) -> Result<BoxStream<'static, Result<Row, StoreError>>, StoreError> {
        (**self).scan(table, filter).await
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Row>, StoreError> {
        (**self).batch_get(table, keys).await
    }
}
