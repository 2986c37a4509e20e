use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::LockError;
use crate::error::StoreError;
use crate::record::RowKey;
use crate::store::Attributes;
use crate::store::Condition;
use crate::store::DeleteOutcome;
use crate::store::DeleteScope;
use crate::store::KvStore;

use super::state::Acquisition;
use super::state::LockState;

/// Default pause between claiming a lock and verifying the claim.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Proof that [`LockCoordinator::acquire`] reached [`LockState::Locked`].
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locked {
    row_key: RowKey,
    contender: String,
}

impl Locked {
    pub fn row_key(&self) -> &RowKey {
        &self.row_key
    }

    pub fn contender(&self) -> &str {
        &self.contender
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The contender's choosing entry was removed.
    Released,
    /// The choosing row did not name the contender. Another contender may have
    /// cleaned up in the meantime.
    NotHeld,
}

/// Mutual exclusion over row keys, built from single-row writes.
///
/// Every row key is guarded by two rows in the locks table. The *choosing
/// row* collects everyone currently trying to take the lock, the *lock row*
/// names the owner. Each contender writes an attribute named after itself
/// into these rows.
///
/// A contender that finds the lock row naming someone else gives way to that
/// holder. Otherwise it backs off if anyone else is in the choosing row. If it
/// is alone, it writes itself into the lock row, waits for the settle delay
/// and reads the lock row again. It holds the lock iff it is then the sole
/// entry. Both checks are required:
/// contenders that choose concurrently may both pass the first check before
/// either has written the lock row.
///
/// The protocol guarantees that at most one contender holds the lock. It does
/// not guarantee that anyone does; simultaneous contenders may all fail and
/// must retry, preferably after a randomized pause.
#[derive(Debug)]
pub struct LockCoordinator<S> {
    store: Arc<S>,
    table: String,
    settle_delay: Duration,
}

impl<S> Clone for LockCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            table: self.table.clone(),
            settle_delay: self.settle_delay,
        }
    }
}

impl<S: KvStore> LockCoordinator<S> {
    pub fn new(store: Arc<S>, table: impl Into<String>, settle_delay: Duration) -> Self {
        Self {
            store,
            table: table.into(),
            settle_delay,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Tries once to take the lock for `row_key` on behalf of `contender`.
    ///
    /// Succeeds if `contender` already holds the lock.
    pub async fn acquire(&self, row_key: &RowKey, contender: &str) -> Result<Locked, LockError> {
        let mut acquisition = Acquisition::new(row_key, contender);

        match self.run(&mut acquisition).await {
            Ok(()) => {
                info!("Got lock `{}` for `{}`.", row_key, contender);

                Ok(Locked {
                    row_key: row_key.clone(),
                    contender: contender.to_string(),
                })
            }
            Err(err) => {
                debug!(
                    "Failed to lock `{}` for `{}` while {:?}: {}",
                    row_key,
                    contender,
                    acquisition.state(),
                    err
                );

                self.clean_up(&acquisition, &err).await;
                acquisition.transition(LockState::Failed);

                Err(err)
            }
        }
    }

    async fn run(&self, acquisition: &mut Acquisition<'_>) -> Result<(), LockError> {
        let contender = acquisition.contender;
        let choosing_key = acquisition.row_key.choosing_key();
        let lock_key = acquisition.row_key.lock_key();

        acquisition.transition(LockState::Choosing);
        self.enter(&choosing_key, contender).await?;

        let choosing = self.entries(&choosing_key).await?;

        // a holder wins over contention, whoever else is choosing
        let holders = self.entries(&lock_key).await?;
        if let Some(holder) = holders.keys().find(|h| h.as_str() != contender) {
            return Err(LockError::HeldByOther {
                key: lock_key,
                holder: holder.clone(),
            });
        }

        if choosing.len() > 1 {
            acquisition.transition(LockState::Contending);

            return Err(LockError::Contention {
                key: choosing_key,
                contenders: choosing.len(),
            });
        }

        acquisition.held_before = holders.contains_key(contender);

        acquisition.transition(LockState::Locking);
        acquisition.wrote_lock = true;
        self.enter(&lock_key, contender).await?;

        if !self.settle_delay.is_zero() {
            futures_timer::Delay::new(self.settle_delay).await;
        }

        let holders = self.entries(&lock_key).await?;
        if holders.len() == 1 && holders.contains_key(contender) {
            acquisition.transition(LockState::Locked);

            Ok(())
        } else {
            Err(LockError::RaceLost { key: lock_key })
        }
    }

    /// Removes whatever the failed attempt left behind.
    ///
    /// Only the contender's own entries are touched. Failures are logged and
    /// otherwise ignored, they must not mask the reason the attempt failed.
    async fn clean_up(&self, acquisition: &Acquisition<'_>, err: &LockError) {
        let contender = acquisition.contender;

        if acquisition.state() != LockState::Idle {
            let key = acquisition.row_key.choosing_key();

            if let Err(cleanup_err) = self.leave(&key, contender).await {
                warn!(
                    "Failed to remove `{}` from `{}` after {}: {}",
                    contender, key, err, cleanup_err
                );
            }
        }

        if acquisition.wrote_lock && !acquisition.held_before {
            let key = acquisition.row_key.lock_key();

            if let Err(cleanup_err) = self.leave(&key, contender).await {
                warn!(
                    "Failed to remove `{}` from `{}` after {}: {}",
                    contender, key, err, cleanup_err
                );
            }
        }
    }

    /// Removes `contender`'s entry from the choosing row of `row_key`.
    ///
    /// Never touches the lock row, which remains as the record of who owns
    /// the identity slot. Calling this for a contender that never held the
    /// lock is harmless.
    pub async fn release(
        &self,
        row_key: &RowKey,
        contender: &str,
    ) -> Result<ReleaseOutcome, StoreError> {
        let key = row_key.choosing_key();

        match self.leave(&key, contender).await? {
            DeleteOutcome::Deleted(_) => {
                Acquisition::held(row_key, contender).transition(LockState::Released);
                debug!("Released `{}` for `{}`.", row_key, contender);

                Ok(ReleaseOutcome::Released)
            }
            DeleteOutcome::ConditionFailed => {
                debug!(
                    "Choosing row `{}` does not name `{}`, nothing to release.",
                    key, contender
                );

                Ok(ReleaseOutcome::NotHeld)
            }
        }
    }

    /// Deletes both lock rows of a held lock, the lock row first.
    ///
    /// A crash in between leaves the choosing row behind, which errs on the
    /// side of blocking later claims.
    pub async fn tear_down(&self, locked: Locked) -> Result<(), StoreError> {
        let lock_key = locked.row_key.lock_key();
        let condition = Condition::attribute_equals(&locked.contender, &locked.contender);

        if let DeleteOutcome::ConditionFailed = self
            .store
            .delete(&self.table, &lock_key, DeleteScope::Row, Some(condition))
            .await?
        {
            warn!(
                "Lock row `{}` no longer names `{}`, deleting choosing row regardless.",
                lock_key, locked.contender
            );
        }

        let _ = self
            .store
            .delete(
                &self.table,
                &locked.row_key.choosing_key(),
                DeleteScope::Row,
                None,
            )
            .await?;

        Ok(())
    }

    async fn enter(&self, key: &str, contender: &str) -> Result<(), StoreError> {
        let mut attributes = Attributes::new();
        attributes.insert(contender.to_string(), contender.to_string());

        // unconditional, concurrent contenders must all be able to write
        let _ = self.store.put(&self.table, key, attributes, None).await?;

        Ok(())
    }

    async fn leave(&self, key: &str, contender: &str) -> Result<DeleteOutcome, StoreError> {
        self.store
            .delete(
                &self.table,
                key,
                DeleteScope::attribute(contender),
                Some(Condition::attribute_equals(contender, contender)),
            )
            .await
    }

    async fn entries(&self, key: &str) -> Result<Attributes, StoreError> {
        let keys = [key.to_string()];
        let mut rows = self.store.batch_get(&self.table, &keys).await?;

        Ok(rows.remove(key).map(|r| r.attributes).unwrap_or_default())
    }
}
