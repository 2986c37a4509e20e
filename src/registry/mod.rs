//! Claiming and giving up cluster identities.

mod builder;

use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::RegistryError;
use crate::error::StoreError;
use crate::locking::LockCoordinator;
use crate::locking::Locked;
use crate::record::InstanceDescriptor;
use crate::retry::RetryPolicy;
use crate::store::DeleteScope;
use crate::store::KvStore;
use crate::topology::TopologyQuery;

pub use builder::RegistryBuilder;
pub use builder::RegistryBuilderBlank;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A record for the descriptor's slot existed already and was left as is.
    AlreadyExists,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Maintains the cluster-wide mapping of `(application, rack, slot)` to
/// instances.
///
/// Every write happens under the lock of the record's row key, with the
/// instance id as contender. The lock row is left in place after a create,
/// so a slot stays reserved for its instance until the entry is deleted.
#[derive(Debug)]
pub struct IdentityRegistry<S> {
    store: Arc<S>,
    locks: LockCoordinator<S>,
    topology: TopologyQuery<S>,
}

impl<S> Clone for IdentityRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: self.locks.clone(),
            topology: self.topology.clone(),
        }
    }
}

impl<S: KvStore> IdentityRegistry<S> {
    pub fn topology(&self) -> &TopologyQuery<S> {
        &self.topology
    }

    pub fn locks(&self) -> &LockCoordinator<S> {
        &self.locks
    }

    /// Claims the descriptor's slot and records the descriptor in it.
    ///
    /// Does nothing if the slot is already recorded. The lock is released
    /// whether or not writing the record succeeds.
    pub async fn create_instance_entry(
        &self,
        descriptor: &InstanceDescriptor,
    ) -> Result<CreateOutcome, RegistryError> {
        let row_key = descriptor.row_key();

        if self
            .topology
            .get_instance(&descriptor.application, &descriptor.rack, descriptor.slot)
            .await?
            .is_some()
        {
            debug!("Instance `{}` exists already.", row_key);

            return Ok(CreateOutcome::AlreadyExists);
        }

        let locked = self.locks.acquire(&row_key, &descriptor.instance_id).await?;

        let written = self.write_record(descriptor).await;
        self.release(&locked).await;
        written?;

        info!(
            "Created instance `{}` for `{}` with token {}.",
            row_key, descriptor.instance_id, descriptor.token
        );

        Ok(CreateOutcome::Created)
    }

    /// Removes the descriptor's record and the rows guarding it.
    ///
    /// The record goes first, then the lock row, then the choosing row. An
    /// interrupted delete thereby leaves the slot locked rather than
    /// unlocked with a record in it.
    pub async fn delete_instance_entry(
        &self,
        descriptor: &InstanceDescriptor,
    ) -> Result<DeleteOutcome, RegistryError> {
        let row_key = descriptor.row_key();

        let locked = self.locks.acquire(&row_key, &descriptor.instance_id).await?;

        let key = match self
            .topology
            .find_key(
                &descriptor.application,
                descriptor.slot,
                &descriptor.datacenter,
                &descriptor.rack,
            )
            .await
        {
            Ok(Some(key)) => key,
            Ok(None) => {
                debug!("Instance `{}` not found, nothing to delete.", row_key);
                self.locks.tear_down(locked).await?;

                return Ok(DeleteOutcome::NotFound);
            }
            Err(err) => {
                self.release(&locked).await;

                return Err(err.into());
            }
        };

        if let Err(err) = self.delete_record(&key).await {
            self.release(&locked).await;

            return Err(err.into());
        }

        self.locks.tear_down(locked).await?;

        info!(
            "Deleted instance `{}` of `{}`.",
            row_key, descriptor.instance_id
        );

        Ok(DeleteOutcome::Deleted)
    }

    /// Like [`create_instance_entry`][Self::create_instance_entry], but
    /// repeats failed attempts for as long as `policy` allows.
    pub async fn create_instance_entry_with<P: RetryPolicy>(
        &self,
        descriptor: &InstanceDescriptor,
        mut policy: P,
    ) -> Result<CreateOutcome, P::Error> {
        loop {
            match self.create_instance_entry(descriptor).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    debug!("Creating `{}` failed: {}", descriptor.row_key(), err);
                    policy.eval(err).await?;
                }
            }
        }
    }

    /// Like [`delete_instance_entry`][Self::delete_instance_entry], but
    /// repeats failed attempts for as long as `policy` allows.
    pub async fn delete_instance_entry_with<P: RetryPolicy>(
        &self,
        descriptor: &InstanceDescriptor,
        mut policy: P,
    ) -> Result<DeleteOutcome, P::Error> {
        loop {
            match self.delete_instance_entry(descriptor).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    debug!("Deleting `{}` failed: {}", descriptor.row_key(), err);
                    policy.eval(err).await?;
                }
            }
        }
    }

    async fn write_record(&self, descriptor: &InstanceDescriptor) -> Result<(), StoreError> {
        let mut record = descriptor.clone();
        record.updated_at = Some(now_millis());

        let _ = self
            .store
            .put(
                self.topology.table(),
                record.row_key().as_str(),
                record.to_attributes(),
                None,
            )
            .await?;

        Ok(())
    }

    async fn delete_record(&self, key: &str) -> Result<(), StoreError> {
        let _ = self
            .store
            .delete(self.topology.table(), key, DeleteScope::Row, None)
            .await?;

        Ok(())
    }

    async fn release(&self, locked: &Locked) {
        if let Err(err) = self
            .locks
            .release(locked.row_key(), locked.contender())
            .await
        {
            warn!(
                "Failed to release `{}` for `{}`: {}",
                locked.row_key(),
                locked.contender(),
                err
            );
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
