use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use async_trait::async_trait;
use futures::lock::Mutex;
use futures::stream::BoxStream;
use futures::stream::StreamExt;

use crate::error::StoreError;

use super::Attributes;
use super::Condition;
use super::DeleteOutcome;
use super::DeleteScope;
use super::Filter;
use super::KvStore;
use super::PutOutcome;
use super::Row;

type Table = BTreeMap<String, Attributes>;
type FaultFn = dyn Fn(&Operation<'_>) -> bool + Send + Sync;

/// Store operation as presented to an injected fault predicate.
#[derive(Clone, Copy, Debug)]
pub struct Operation<'a> {
    pub kind: OperationKind,
    pub table: &'a str,
    /// `None` for scans, the first key for batch reads.
    pub key: Option<&'a str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Put,
    Delete,
    Scan,
    BatchGet,
}

/// In-process [`KvStore`].
///
/// Clones share the same tables, so one `MemoryStore` can stand in for the
/// shared table of an entire simulated cluster. Tables spring into existence
/// on first write; reading a table that was never written yields nothing.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<String, Table>>>,
    unavailable: Arc<atomic::AtomicBool>,
    faults: Arc<Mutex<Option<Box<FaultFn>>>>,
    interleaved: bool,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("unavailable", &self.unavailable)
            .field("interleaved", &self.interleaved)
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store in which every operation yields to the executor once
    /// before it takes effect.
    ///
    /// Contenders that are polled concurrently on one executor (e.g. via
    /// `futures::join!`) thereby alternate step by step.
    pub fn interleaved() -> Self {
        Self {
            interleaved: true,
            ..Self::default()
        }
    }

    /// Makes every subsequent operation fail with
    /// [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, atomic::Ordering::SeqCst);
    }

    /// Makes operations for which `fault` returns `true` fail with
    /// [`StoreError::Unavailable`].
    pub async fn inject_faults<F>(&self, fault: F)
    where
        F: Fn(&Operation<'_>) -> bool + Send + Sync + 'static,
    {
        *self.faults.lock().await = Some(Box::new(fault));
    }

    pub async fn clear_faults(&self) {
        *self.faults.lock().await = None;
    }

    /// Returns a copy of the given row.
    pub async fn row(&self, table: &str, key: &str) -> Option<Row> {
        let tables = self.tables.lock().await;

        tables
            .get(table)
            .and_then(|t| t.get(key))
            .map(|attributes| Row::new(key, attributes.clone()))
    }

    /// Returns a copy of all rows in the given table, ordered by key.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.lock().await;

        tables
            .get(table)
            .map(|t| {
                t.iter()
                    .map(|(k, a)| Row::new(k.clone(), a.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn enter(&self, operation: Operation<'_>) -> Result<(), StoreError> {
        if self.interleaved {
            YieldNow(false).await;
        }

        if self.unavailable.load(atomic::Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store switched off"));
        }

        let faults = self.faults.lock().await;
        if faults.as_ref().map_or(false, |f| f(&operation)) {
            return Err(StoreError::unavailable(format!(
                "injected fault for {:?} on `{}`",
                operation.kind, operation.table
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(
        &self,
        table: &str,
        key: &str,
        attributes: Attributes,
        condition: Option<Condition>,
    ) -> Result<PutOutcome, StoreError> {
        self.enter(Operation {
            kind: OperationKind::Put,
            table,
            key: Some(key),
        })
        .await?;

        let mut tables = self.tables.lock().await;
        let table = tables.entry(table.to_string()).or_default();

        if let Some(condition) = condition {
            if !condition.holds_for(table.get(key)) {
                return Ok(PutOutcome::ConditionFailed);
            }
        }

        table.entry(key.to_string()).or_default().extend(attributes);

        Ok(PutOutcome::Written)
    }

    async fn delete(
        &self,
        table: &str,
        key: &str,
        scope: DeleteScope,
        condition: Option<Condition>,
    ) -> Result<DeleteOutcome, StoreError> {
        self.enter(Operation {
            kind: OperationKind::Delete,
            table,
            key: Some(key),
        })
        .await?;

        let mut tables = self.tables.lock().await;
        let table = match tables.get_mut(table) {
            Some(table) => table,
            None => {
                return Ok(match condition {
                    Some(c) if !c.holds_for(None) => DeleteOutcome::ConditionFailed,
                    _ => DeleteOutcome::Deleted(None),
                })
            }
        };

        if let Some(condition) = condition {
            if !condition.holds_for(table.get(key)) {
                return Ok(DeleteOutcome::ConditionFailed);
            }
        }

        let old = match scope {
            DeleteScope::Row => table.remove(key),
            DeleteScope::Attributes(names) => {
                let old = table.get(key).cloned();

                if let Some(attributes) = table.get_mut(key) {
                    for name in &names {
                        attributes.remove(name);
                    }
                }

                if table.get(key).map_or(false, |a| a.is_empty()) {
                    table.remove(key);
                }

                old
            }
        };

        Ok(DeleteOutcome::Deleted(old.map(|a| Row::new(key, a))))
    }

    async fn scan(
        &self,
        table: &str,
        filter: &Filter,
    ) -> Result<BoxStream<'static, Result<Row, StoreError>>, StoreError> {
        self.enter(Operation {
            kind: OperationKind::Scan,
            table,
            key: None,
        })
        .await?;

        let tables = self.tables.lock().await;
        let rows = tables
            .get(table)
            .into_iter()
            .flat_map(|t| t.iter())
            .map(|(k, a)| Row::new(k.clone(), a.clone()))
            .filter(|r| filter.matches(r))
            .map(Ok)
            .collect::<Vec<_>>();

        Ok(futures::stream::iter(rows).boxed())
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Row>, StoreError> {
        self.enter(Operation {
            kind: OperationKind::BatchGet,
            table,
            key: keys.first().map(String::as_str),
        })
        .await?;

        let tables = self.tables.lock().await;
        let table = match tables.get(table) {
            Some(table) => table,
            None => return Ok(HashMap::new()),
        };

        Ok(keys
            .iter()
            .filter_map(|k| table.get(k).map(|a| (k.clone(), Row::new(k.clone(), a.clone()))))
            .collect())
    }
}

/// Completes on the second poll, waking itself after the first.
struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use futures::stream::TryStreamExt;

    use super::MemoryStore;
    use super::OperationKind;
    use crate::error::StoreError;
    use crate::store::Attributes;
    use crate::store::Condition;
    use crate::store::DeleteOutcome;
    use crate::store::DeleteScope;
    use crate::store::Filter;
    use crate::store::KvStore;
    use crate::store::PutOutcome;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_put_merges_attributes() {
        let store = MemoryStore::new();

        block_on(async {
            let r = store.put("t", "k", attrs(&[("a", "1")]), None).await.unwrap();
            assert_eq!(r, PutOutcome::Written);
            let r = store.put("t", "k", attrs(&[("b", "2")]), None).await.unwrap();
            assert_eq!(r, PutOutcome::Written);

            let row = store.row("t", "k").await.unwrap();
            assert_eq!(row.attributes, attrs(&[("a", "1"), ("b", "2")]));
        });
    }

    #[test]
    fn test_conditional_put() {
        let store = MemoryStore::new();

        block_on(async {
            let cond = Condition::AttributeNotExists("a".to_string());
            let r = store.put("t", "k", attrs(&[("a", "1")]), Some(cond.clone())).await;
            assert_eq!(r.unwrap(), PutOutcome::Written);

            let r = store.put("t", "k", attrs(&[("a", "2")]), Some(cond)).await;
            assert_eq!(r.unwrap(), PutOutcome::ConditionFailed);

            let row = store.row("t", "k").await.unwrap();
            assert_eq!(row.get("a"), Some("1"));
        });
    }

    #[test]
    fn test_delete_attribute_removes_empty_row() {
        let store = MemoryStore::new();

        block_on(async {
            let _ = store.put("t", "k", attrs(&[("a", "a"), ("b", "b")]), None).await.unwrap();

            let r = store
                .delete("t", "k", DeleteScope::attribute("a"), None)
                .await
                .unwrap();
            assert!(matches!(r, DeleteOutcome::Deleted(Some(_))));
            assert_eq!(store.row("t", "k").await.unwrap().attributes, attrs(&[("b", "b")]));

            let _ = store
                .delete("t", "k", DeleteScope::attribute("b"), None)
                .await
                .unwrap();
            assert!(store.row("t", "k").await.is_none());
        });
    }

    #[test]
    fn test_conditional_delete_mismatch() {
        let store = MemoryStore::new();

        block_on(async {
            let _ = store.put("t", "k", attrs(&[("a", "x")]), None).await.unwrap();

            let r = store
                .delete("t", "k", DeleteScope::Row, Some(Condition::attribute_equals("a", "y")))
                .await
                .unwrap();
            assert_eq!(r, DeleteOutcome::ConditionFailed);
            assert!(store.row("t", "k").await.is_some());

            let r = store
                .delete("t", "missing", DeleteScope::Row, Some(Condition::attribute_equals("a", "y")))
                .await
                .unwrap();
            assert_eq!(r, DeleteOutcome::ConditionFailed);
        });
    }

    #[test]
    fn test_scan_and_batch_get() {
        let store = MemoryStore::new();

        block_on(async {
            let _ = store.put("t", "k1", attrs(&[("app", "a")]), None).await.unwrap();
            let _ = store.put("t", "k2", attrs(&[("app", "b")]), None).await.unwrap();
            let _ = store.put("t", "k3", attrs(&[("app", "a")]), None).await.unwrap();

            let rows: Vec<_> = store
                .scan("t", &Filter::new().where_eq("app", "a"))
                .await
                .unwrap()
                .try_collect()
                .await
                .unwrap();
            let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
            assert_eq!(keys, vec!["k1", "k3"]);

            let got = store
                .batch_get("t", &["k2".to_string(), "nope".to_string()])
                .await
                .unwrap();
            assert_eq!(got.len(), 1);
            assert!(got.contains_key("k2"));

            let none = store.batch_get("other", &["k1".to_string()]).await.unwrap();
            assert!(none.is_empty());
        });
    }

    #[test]
    fn test_unavailable_and_injected_faults() {
        let store = MemoryStore::new();

        block_on(async {
            store.set_unavailable(true);
            let r = store.put("t", "k", attrs(&[("a", "1")]), None).await;
            assert!(matches!(r, Err(StoreError::Unavailable(_))));
            store.set_unavailable(false);

            store
                .inject_faults(|op| op.kind == OperationKind::Delete && op.table == "t")
                .await;
            let _ = store.put("t", "k", attrs(&[("a", "1")]), None).await.unwrap();
            let r = store.delete("t", "k", DeleteScope::Row, None).await;
            assert!(matches!(r, Err(StoreError::Unavailable(_))));

            store.clear_faults().await;
            let r = store.delete("t", "k", DeleteScope::Row, None).await;
            assert!(matches!(r, Ok(DeleteOutcome::Deleted(Some(_)))));
        });
    }
}
