use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn empty_lookup_yields_defaults() {
    let cfg = Config::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, Config::default());
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert!(cfg.server_id.is_none());
    assert!(cfg.close_empty_rooms);
}

#[test]
fn explicit_values_override_defaults() {
    let cfg = Config::from_lookup(lookup_from(&[
        ("PORT", "8080"),
        ("SERVER_ID", "edge-1"),
        ("SNAPSHOT_DIR", "/var/lib/wb"),
        ("FILE_BASE_URL", "https://files.example.org/"),
        ("CLIENT_CHANNEL_CAPACITY", "32"),
        ("CLOSE_EMPTY_ROOMS", "off"),
    ]))
    .unwrap();

    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.server_id.as_deref(), Some("edge-1"));
    assert_eq!(cfg.snapshot_dir, PathBuf::from("/var/lib/wb"));
    assert_eq!(cfg.file_base_url, "https://files.example.org");
    assert_eq!(cfg.client_channel_capacity, 32);
    assert!(!cfg.close_empty_rooms);
}

#[test]
fn blank_server_id_means_local_node() {
    let cfg = Config::from_lookup(lookup_from(&[("SERVER_ID", "  ")])).unwrap();
    assert!(cfg.server_id.is_none());
}

#[test]
fn invalid_port_is_an_error() {
    let err = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
    assert_eq!(err, ConfigError::Invalid { key: "PORT", value: "eighty".into() });
}

#[test]
fn invalid_bool_is_an_error() {
    let err = Config::from_lookup(lookup_from(&[("CLOSE_EMPTY_ROOMS", "maybe")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "CLOSE_EMPTY_ROOMS", .. }));
}

#[test]
fn zero_channel_capacity_is_an_error() {
    let err = Config::from_lookup(lookup_from(&[("CLIENT_CHANNEL_CAPACITY", "0")])).unwrap_err();
    assert_eq!(err, ConfigError::Invalid { key: "CLIENT_CHANNEL_CAPACITY", value: "0".into() });
}
