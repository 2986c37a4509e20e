//! Ringslot hands out cluster-wide unique identities to the nodes of a
//! replicated data store. An identity is a slot within a rack, together with
//! the node's hash-ring token and addresses. Nodes claim identities through a
//! lock protocol that needs nothing more than single-row conditional writes
//! from the shared key-value store, i.e. no transactions and no leases.
//!
//! # Usage
//!
//! A registry is built around a [`KvStore`] implementation. The
//! [`MemoryStore`] is meant for tests and simulations, enable the `dynamodb`
//! feature for a production backend.
//!
//! ```
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! use futures::executor::block_on;
//! use ringslot::store::MemoryStore;
//! use ringslot::{CreateOutcome, InstanceDescriptor};
//!
//! let registry = ringslot::registry_builder()
//!     .backed_by(MemoryStore::new())
//!     .settle_delay(Duration::from_millis(10))
//!     .build();
//!
//! let descriptor = InstanceDescriptor {
//!     application: "dyno_demo".to_string(),
//!     rack: "us-east-1c".to_string(),
//!     slot: 0,
//!     instance_id: "i-0a1b2c".to_string(),
//!     hostname: "ip-10-0-0-1".to_string(),
//!     address: "10.0.0.1".to_string(),
//!     datacenter: "us-east-1".to_string(),
//!     zone: "us-east-1c".to_string(),
//!     token: "1383429731".to_string(),
//!     volumes: BTreeMap::new(),
//!     updated_at: None,
//! };
//!
//! block_on(async {
//!     let outcome = registry.create_instance_entry(&descriptor).await.unwrap();
//!     assert_eq!(outcome, CreateOutcome::Created);
//!
//!     let peers = registry
//!         .topology()
//!         .get_instances_in_region("dyno_demo", "us-east-1")
//!         .await
//!         .unwrap();
//!     assert_eq!(peers.len(), 1);
//! });
//! ```
//!
//! # Protocol
//!
//! Each identity is guarded by two rows in the locks table, the *choosing
//! row* and the *lock row*. A contender, identified by its instance id,
//!
//!  1. adds itself to the choosing row,
//!  2. gives up if anyone else is in the lock row,
//!  3. gives up if anyone else is in the choosing row,
//!  4. adds itself to the lock row,
//!  5. waits for the settle delay, and
//!  6. holds the lock iff it is the only entry in the lock row.
//!
//! At most one contender holds a lock at any time. Contenders that arrive
//! simultaneously may all give up and are expected to retry after a
//! randomized pause, see [`retry`].
//!
//! # Cargo Features
//!
//! - `backoff` adds [`RetryWithBackoff`][retry::RetryWithBackoff].
//! - `dynamodb` adds [`DynamoDbStore`][store::dynamodb::DynamoDbStore].

//
// Lint configuration
#![warn(rust_2018_idioms)]
#![warn(clippy::wildcard_imports)]

pub mod config;
pub mod error;
pub mod locking;
pub mod record;
pub mod registry;
pub mod retry;
pub mod store;
pub mod topology;

pub use config::RegistryConfig;
pub use error::LockError;
pub use error::RegistryError;
pub use error::StoreError;
pub use locking::LockCoordinator;
#[doc(inline)]
pub use record::InstanceDescriptor;
pub use record::InstanceRecord;
pub use record::RowKey;
pub use registry::CreateOutcome;
pub use registry::DeleteOutcome;
pub use registry::IdentityRegistry;
pub use registry::RegistryBuilder;
#[doc(inline)]
pub use store::KvStore;
pub use store::MemoryStore;
pub use topology::TopologyQuery;

/// Starts building an [`IdentityRegistry`].
pub fn registry_builder() -> registry::RegistryBuilderBlank {
    registry::RegistryBuilderBlank::new()
}
