//! URL canonicalization and uniqueness.

use herd_registry::{normalize_url, Registry, ServerSpec};

#[test]
fn add_twice_leaves_one_entry() {
    let registry = Registry::new(4);
    registry
        .add(ServerSpec::new("http://Node-1:11434/"))
        .unwrap();
    assert!(registry.add(ServerSpec::new("http://node-1:11434")).is_err());
    assert_eq!(registry.len(), 1);
}

#[test]
fn normalization_is_idempotent_over_realistic_inputs() {
    for raw in [
        "HTTP://LOCALHOST:80",
        "https://Fleet-3.internal:443/",
        "http://10.1.2.3:11434///",
        "http://gpu-a100.rack2:8080/api/",
    ] {
        let once = normalize_url(raw).unwrap();
        assert_eq!(normalize_url(&once).unwrap(), once, "not idempotent: {raw}");
    }
}

#[test]
fn distinct_ports_are_distinct_servers() {
    let registry = Registry::new(4);
    registry
        .add(ServerSpec::new("http://host:11434").id("a"))
        .unwrap();
    registry
        .add(ServerSpec::new("http://host:11435").id("b"))
        .unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn default_port_and_explicit_port_collide() {
    let registry = Registry::new(4);
    registry.add(ServerSpec::new("http://host")).unwrap();
    assert!(registry.add(ServerSpec::new("http://host:80/")).is_err());
}
