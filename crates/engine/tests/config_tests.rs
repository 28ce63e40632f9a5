use std::{io::Write, path::PathBuf, time::Duration};

use tracing::info;
use walnut_engine::{EngineConfig, RegistryConfig, DEFAULT_RPC_URL};

#[test]
fn test_load_config_file() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
registry_timeout_secs = 7
collect_steps = false

[compiler]
solc_version = "0.8.26"
extra_args = ["--metadata-hash", "none"]

[scratch]
root = "/var/tmp/walnut"
max_age_secs = 120

[[chains]]
chain_id = 8453
rpc_url = "http://base-node:8545"
primary = {{ kind = "blockscout", url = "https://base.blockscout.com" }}
"#
    )
    .unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.registry_timeout(), Duration::from_secs(7));
    assert!(!config.collect_steps);
    assert_eq!(config.compiler.solc_version.as_deref(), Some("0.8.26"));
    assert_eq!(config.compiler.extra_args, ["--metadata-hash", "none"]);
    assert_eq!(config.scratch.root, PathBuf::from("/var/tmp/walnut"));
    assert_eq!(config.scratch.max_age(), Duration::from_secs(120));
    // Unset fields keep their defaults.
    assert_eq!(config.scratch.sweep_interval(), Duration::from_secs(300));
    assert_eq!(config.rpc_timeout(), Duration::from_secs(30));

    assert_eq!(config.rpc_url_for(Some(8453)), "http://base-node:8545");
    let (primary, secondary) = config.registries_for(8453);
    assert_eq!(
        primary,
        &RegistryConfig::Blockscout { url: "https://base.blockscout.com".into(), api_key: None }
    );
    assert!(secondary.is_none());
}

#[test]
fn test_load_missing_file() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::load(dir.path().join("walnut.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn test_load_rejects_unknown_registry_kind() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let text = r#"
[[chains]]
chain_id = 1
rpc_url = "http://localhost:8545"
primary = { kind = "etherscan", url = "https://api.etherscan.io" }
"#;
    assert!(EngineConfig::from_toml(text).is_err());
}

#[test]
fn test_config_round_trips_through_toml() {
    walnut_common::logging::ensure_test_logging(None);
    info!("Running test");

    let config = EngineConfig::default()
        .with_default_rpc_url("http://archive:8545")
        .with_strict_version_check(true);
    let text = toml::to_string(&config).unwrap();
    let back = EngineConfig::from_toml(&text).unwrap();
    assert_eq!(back, config);
    assert_ne!(back.default_rpc_url, DEFAULT_RPC_URL);
}
