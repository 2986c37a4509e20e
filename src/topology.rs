//! Read-only views of the identities claimed so far.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::TryStreamExt;
use tracing::warn;

use crate::error::StoreError;
use crate::record::InstanceRecord;
use crate::record::CN_APPID;
use crate::record::CN_DC;
use crate::record::CN_ID;
use crate::record::CN_LOCATION;
use crate::store::Filter;
use crate::store::KvStore;
use crate::store::Row;

/// Answers questions about the cluster's membership by scanning the tokens
/// table.
///
/// Scans are linear in the table size, which is fine for clusters of a few
/// hundred nodes.
#[derive(Debug)]
pub struct TopologyQuery<S> {
    store: Arc<S>,
    table: String,
}

impl<S> Clone for TopologyQuery<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            table: self.table.clone(),
        }
    }
}

impl<S: KvStore> TopologyQuery<S> {
    pub fn new(store: Arc<S>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Looks up the record claiming `slot` in `rack`.
    pub async fn get_instance(
        &self,
        application: &str,
        rack: &str,
        slot: u32,
    ) -> Result<Option<InstanceRecord>, StoreError> {
        let instances = self.get_all_instances(application).await?;

        Ok(instances
            .into_iter()
            .find(|i| i.rack == rack && i.slot == slot))
    }

    /// Returns every record of `application`, in no particular order.
    pub async fn get_all_instances(
        &self,
        application: &str,
    ) -> Result<HashSet<InstanceRecord>, StoreError> {
        let filter = Filter::new().where_eq(CN_APPID, application);

        self.scan_records(&filter).await
    }

    pub async fn get_instances_in_region(
        &self,
        application: &str,
        datacenter: &str,
    ) -> Result<HashSet<InstanceRecord>, StoreError> {
        let mut instances = self.get_all_instances(application).await?;
        instances.retain(|i| i.datacenter == datacenter);

        Ok(instances)
    }

    /// Returns the key of the row claiming `slot` in `rack` of `datacenter`,
    /// without decoding the row.
    pub async fn find_key(
        &self,
        application: &str,
        slot: u32,
        datacenter: &str,
        rack: &str,
    ) -> Result<Option<String>, StoreError> {
        let filter = Filter::new()
            .where_eq(CN_APPID, application)
            .where_eq(CN_ID, slot.to_string())
            .where_eq(CN_LOCATION, datacenter)
            .where_eq(CN_DC, rack);

        let row: Option<Row> = self
            .store
            .scan(&self.table, &filter)
            .await?
            .try_next()
            .await?;

        Ok(row.map(|r| r.key))
    }

    async fn scan_records(&self, filter: &Filter) -> Result<HashSet<InstanceRecord>, StoreError> {
        self.store
            .scan(&self.table, filter)
            .await?
            .try_fold(HashSet::new(), |mut records, row| async move {
                match InstanceRecord::from_row(&row) {
                    Ok(record) => {
                        records.insert(record);
                    }
                    Err(err) => warn!("Skipping row in `{}`: {}", self.table, err),
                }

                Ok::<_, StoreError>(records)
            })
            .await
    }
}

