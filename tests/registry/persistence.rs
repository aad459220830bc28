//! Persisted registry state: dedup on load, ban round-trips.

use herd_core::now_millis;
use herd_registry::{Ban, Registry, Server, ServerSpec, ServerType};
use std::time::Duration;

fn record(id: &str, url: &str) -> Server {
    Server {
        id: id.into(),
        url: url.into(),
        server_type: ServerType::Standard,
        healthy: true,
        models: vec!["llama3".into()],
        last_response_time: 10,
        max_concurrency: None,
        supports_primary: Some(true),
        supports_compat: None,
        api_key: None,
        loaded_models: Vec::new(),
    }
}

#[test]
fn loader_dedups_by_first_occurrence_and_writes_back() {
    let registry = Registry::new(4);
    let kept = registry.load_persisted(vec![
        record("alpha", "http://host-a:11434"),
        record("beta", "HTTP://HOST-A:11434/"),
        record("gamma", "http://host-b:11434"),
        record("broken", "not a url"),
    ]);
    let ids: Vec<_> = kept.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "gamma"]);
    // The write-back list carries canonical URLs.
    assert!(kept.iter().all(|s| s.url.starts_with("http://host-")));
}

#[test]
fn server_round_trip_preserves_everything() {
    let registry = Registry::new(4);
    let server = registry
        .add(
            ServerSpec::new("https://fleet-1:8443")
                .id("s1")
                .max_concurrency(8)
                .api_key("secret"),
        )
        .unwrap();
    let json = serde_json::to_string(&registry.snapshot()).unwrap();
    let decoded: Vec<Server> = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, vec![server]);
}

#[test]
fn ban_round_trip_drops_expired_entries() {
    let registry = Registry::new(4);
    registry.ban("s1", "m", "flapping", Some(Duration::from_secs(3600)));
    registry.ban("s2", "m", "manual", None);
    let bans = registry.bans();
    let json = serde_json::to_string(&bans).unwrap();
    let decoded: Vec<Ban> = serde_json::from_str(&json).unwrap();

    let fresh = Registry::new(4);
    let mut with_expired = decoded.clone();
    with_expired.push(Ban {
        server_id: "s3".into(),
        model: "m".into(),
        reason: "old".into(),
        created_at: 0,
        expires_at: Some(1),
    });
    fresh.load_bans(with_expired);
    assert_eq!(fresh.bans().len(), 2);
    assert!(fresh.is_banned("s1", "m", now_millis()));
    assert!(!fresh.is_banned("s3", "m", now_millis()));
}
