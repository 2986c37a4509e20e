use std::sync::Arc;
use std::time::Duration;

use crate::config::RegistryConfig;
use crate::locking::LockCoordinator;
use crate::store::KvStore;
use crate::topology::TopologyQuery;

use super::IdentityRegistry;

#[derive(Debug, Default)]
pub struct RegistryBuilderBlank;

impl RegistryBuilderBlank {
    pub fn new() -> Self {
        Self
    }

    /// Sets the store all records and locks are kept in.
    ///
    /// The store may be shared, e.g. by passing an `Arc<S>` or a cheaply
    /// cloneable handle.
    pub fn backed_by<S: KvStore>(self, store: S) -> RegistryBuilder<S> {
        RegistryBuilder {
            store: Arc::new(store),
            config: RegistryConfig::default(),
        }
    }
}

pub struct RegistryBuilder<S> {
    store: Arc<S>,
    config: RegistryConfig,
}

impl<S: KvStore> RegistryBuilder<S> {
    /// Replaces the entire configuration.
    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tokens_table(mut self, table: impl Into<String>) -> Self {
        self.config.tables.tokens = table.into();
        self
    }

    pub fn locks_table(mut self, table: impl Into<String>) -> Self {
        self.config.tables.locks = table.into();
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    pub fn build(self) -> IdentityRegistry<S> {
        let RegistryConfig {
            tables,
            settle_delay,
        } = self.config;

        IdentityRegistry {
            locks: LockCoordinator::new(Arc::clone(&self.store), tables.locks, settle_delay),
            topology: TopologyQuery::new(Arc::clone(&self.store), tables.tokens),
            store: self.store,
        }
    }
}
