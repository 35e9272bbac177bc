use std::time::Duration;

use recgraph_core::{GraphConfig, GraphError};

// Environment is process-global, so every variable is exercised in one test.
#[test]
fn config_from_env_reads_overrides_and_validates() {
    std::env::set_var("RECGRAPH_MAX_SPANNING_DEPTH", "8");
    std::env::set_var("RECGRAPH_RECORD_TTL_MS", "1500");
    std::env::set_var("RECGRAPH_STALE_TTL_MS", "not-a-number");
    std::env::set_var("RECGRAPH_EMIT_DENYLIST", "__dlm$, ^Secret$ ,");

    let config = GraphConfig::from_env();
    assert_eq!(config.max_spanning_depth, 8);
    assert_eq!(config.record_ttl, Duration::from_millis(1500));
    assert_eq!(config.stale_ttl, GraphConfig::default().stale_ttl);
    assert_eq!(config.emission_denylist, vec!["__dlm$", "^Secret$"]);
    assert!(config.validate().is_ok());

    std::env::set_var("RECGRAPH_MAX_SPANNING_DEPTH", "0");
    let config = GraphConfig::from_env();
    assert!(matches!(config.validate(), Err(GraphError::Config(_))));

    for var in [
        "RECGRAPH_MAX_SPANNING_DEPTH",
        "RECGRAPH_RECORD_TTL_MS",
        "RECGRAPH_STALE_TTL_MS",
        "RECGRAPH_EMIT_DENYLIST",
    ] {
        std::env::remove_var(var);
    }
    assert_eq!(GraphConfig::from_env(), GraphConfig::default());
}
