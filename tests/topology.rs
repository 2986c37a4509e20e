mod fixture;

use std::collections::HashSet;

use futures::executor::block_on;

use ringslot::store::Attributes;
use ringslot::store::KvStore;
use ringslot::store::MemoryStore;
use ringslot::InstanceRecord;
use ringslot::StoreError;

fn populate(store: &MemoryStore) -> Vec<InstanceRecord> {
    let registry = fixture::registry(store);

    let descriptors = vec![
        fixture::descriptor("app1", "us-east-1a", 0),
        fixture::descriptor("app1", "us-east-1b", 0),
        fixture::descriptor("app1", "us-east-1a", 1),
        fixture::descriptor("app1", "eu-west-1a", 0),
        fixture::descriptor("app2", "us-east-1a", 0),
        fixture::descriptor("app2", "eu-west-1b", 0),
        fixture::descriptor("app3", "us-east-1a", 0),
    ];

    for d in &descriptors {
        let _ = block_on(registry.create_instance_entry(d)).unwrap();
    }

    descriptors
}

fn instance_ids(records: &HashSet<InstanceRecord>) -> HashSet<String> {
    records.iter().map(|r| r.instance_id.clone()).collect()
}

#[test]
fn all_instances_are_filtered_by_application() {
    let store = MemoryStore::new();
    let descriptors = populate(&store);
    let topology = fixture::registry(&store).topology().clone();

    let app1 = block_on(topology.get_all_instances("app1")).unwrap();

    let expected = descriptors
        .iter()
        .filter(|d| d.application == "app1")
        .map(|d| d.instance_id.clone())
        .collect::<HashSet<_>>();
    assert_eq!(instance_ids(&app1), expected);
    assert!(app1.iter().all(|r| r.application == "app1"));

    assert!(block_on(topology.get_all_instances("app4")).unwrap().is_empty());
}

#[test]
fn instances_in_region() {
    let store = MemoryStore::new();
    let _ = populate(&store);
    let registry = fixture::registry(&store);

    let us = block_on(registry.topology().get_instances_in_region("app1", "us-east-1")).unwrap();
    let eu = block_on(registry.topology().get_instances_in_region("app2", "eu-west-1")).unwrap();

    assert_eq!(us.len(), 3);
    assert!(us.iter().all(|r| r.datacenter == "us-east-1"));
    assert_eq!(eu.len(), 1);
    assert_eq!(eu.iter().next().map(|r| r.rack.as_str()), Some("eu-west-1b"));
}

#[test]
fn get_instance_matches_rack_and_slot() {
    let store = MemoryStore::new();
    let descriptors = populate(&store);
    let registry = fixture::registry(&store);

    let found = block_on(registry.topology().get_instance("app1", "us-east-1a", 1))
        .unwrap()
        .unwrap();
    assert_eq!(found.instance_id, descriptors[2].instance_id);
    assert_eq!(found.volumes, descriptors[2].volumes);

    let missing = block_on(registry.topology().get_instance("app1", "us-east-1b", 1)).unwrap();
    assert!(missing.is_none());
}

#[test]
fn find_key_filters_on_datacenter_and_rack() {
    let store = MemoryStore::new();
    let _ = populate(&store);
    let registry = fixture::registry(&store);
    let topology = registry.topology();

    let key = block_on(topology.find_key("app1", 0, "us-east-1", "us-east-1b")).unwrap();
    assert_eq!(key.as_deref(), Some("app1_us-east-1b_0"));

    let key = block_on(topology.find_key("app1", 0, "eu-west-1", "us-east-1b")).unwrap();
    assert_eq!(key, None);
}

#[test]
fn malformed_rows_are_skipped() {
    fixture::init_tracing();

    let store = MemoryStore::new();
    let _ = populate(&store);

    let mut broken = Attributes::new();
    broken.insert("appId".to_string(), "app1".to_string());
    broken.insert("Id".to_string(), "7".to_string());
    let _ = block_on(store.put("tokens", "app1_us-east-1a_7", broken, None)).unwrap();

    let registry = fixture::registry(&store);
    let app1 = block_on(registry.topology().get_all_instances("app1")).unwrap();

    assert_eq!(app1.len(), 4);
}

#[test]
fn scan_failure_is_an_error() {
    let store = MemoryStore::new();
    let _ = populate(&store);
    let registry = fixture::registry(&store);

    store.set_unavailable(true);
    let result = block_on(registry.topology().get_all_instances("app1"));

    assert!(matches!(result, Err(StoreError::Unavailable(_))));
}
