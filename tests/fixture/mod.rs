#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use ringslot::store::MemoryStore;
use ringslot::IdentityRegistry;
use ringslot::InstanceDescriptor;

pub const SETTLE_DELAY: Duration = Duration::from_millis(5);

pub fn descriptor(application: &str, rack: &str, slot: u32) -> InstanceDescriptor {
    let mut volumes = BTreeMap::new();
    volumes.insert("/mnt/data".to_string(), "vol-0f2a".to_string());

    InstanceDescriptor {
        application: application.to_string(),
        rack: rack.to_string(),
        slot,
        instance_id: format!("i-{}", uuid::Uuid::new_v4().simple()),
        hostname: format!("{}-{}-{}.internal", application, rack, slot),
        address: format!("10.0.{}.{}", slot / 256, slot % 256),
        datacenter: region_of(rack).to_string(),
        zone: rack.to_string(),
        token: (u64::from(slot) * 1_431_655_765).to_string(),
        volumes,
        updated_at: None,
    }
}

/// `us-east-1c` -> `us-east-1`
pub fn region_of(rack: &str) -> &str {
    rack.trim_end_matches(|c: char| c.is_ascii_alphabetic())
}

pub fn registry(store: &MemoryStore) -> IdentityRegistry<MemoryStore> {
    ringslot::registry_builder()
        .backed_by(store.clone())
        .settle_delay(SETTLE_DELAY)
        .build()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
