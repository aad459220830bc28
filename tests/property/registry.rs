//! Property tests for URL normalization and registry dedup.

use herd_registry::{normalize_url, Registry, ServerSpec};
use proptest::prelude::*;

fn host_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9-]{0,15}(\\.[a-zA-Z]{2,5}){0,2}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn normalization_is_idempotent(
        scheme in prop::sample::select(vec!["http", "https", "HTTP", "Https"]),
        host in host_strategy(),
        port in prop::option::of(1u16..=u16::MAX),
        slashes in 0usize..3,
    ) {
        let mut url = format!("{scheme}://{host}");
        if let Some(port) = port {
            url.push_str(&format!(":{port}"));
        }
        url.push_str(&"/".repeat(slashes));

        let once = normalize_url(&url).unwrap();
        let twice = normalize_url(&once).unwrap();
        prop_assert_eq!(&once, &twice);
        // Canonical form is lowercase and slash-free at the tail.
        prop_assert!(!once.ends_with('/'));
        prop_assert_eq!(once.clone(), once.to_lowercase());
    }

    #[test]
    fn double_add_always_keeps_one_entry(
        host in host_strategy(),
        port in prop::option::of(1u16..=u16::MAX),
    ) {
        let url = match port {
            Some(port) => format!("http://{host}:{port}"),
            None => format!("http://{host}"),
        };
        let registry = Registry::new(4);
        let first = registry.add(ServerSpec::new(&url));
        prop_assume!(first.is_ok());
        let second = registry.add(ServerSpec::new(format!("{url}/")));
        prop_assert!(second.is_err());
        prop_assert_eq!(registry.len(), 1);
    }
}
