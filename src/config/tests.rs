use super::registry::KEYS;
use super::{encode_proxy_map, parse_proxy_map, CliOverrides, Config, ProxyMap};

fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |key| {
        pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    }
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.log_level, "DEBUG");
    assert_eq!(config.server_port, 8888);
    assert!(config.proxy_map.is_empty());
    assert_eq!(config.consul_address, "config:8500");
    assert!(config.metrics_gateway.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
fn test_env_overrides() {
    let mut config = Config::default();
    config
        .apply_env_from(env(&[
            ("GONVEY_LOG_LEVEL", "ERROR"),
            ("GONVEY_SERVER_PORT", "9999"),
            (
                "GONVEY_PROXY_MAP",
                r#"{"/bloggo":["http://a:4242"],"/test":["http://b:4243","http://c:4244"]}"#,
            ),
            ("GONVEY_CONSUL_ADDRESS", "127.0.0.1:8500"),
        ]))
        .unwrap();

    assert_eq!(config.log_level, "ERROR");
    assert_eq!(config.server_port, 9999);
    assert_eq!(config.proxy_map.len(), 2);
    assert_eq!(config.proxy_map["/test"].len(), 2);
    assert_eq!(config.consul_address, "127.0.0.1:8500");
}

#[test]
fn test_env_rejects_bad_port() {
    let mut config = Config::default();
    assert!(config
        .apply_env_from(env(&[("GONVEY_SERVER_PORT", "not-a-port")]))
        .is_err());
    assert!(config
        .apply_env_from(env(&[("GONVEY_SERVER_PORT", "70000")]))
        .is_err());
}

#[test]
fn test_env_rejects_bad_proxy_map() {
    let mut config = Config::default();
    assert!(config
        .apply_env_from(env(&[("GONVEY_PROXY_MAP", "{not json")]))
        .is_err());
    assert!(config
        .apply_env_from(env(&[("GONVEY_PROXY_MAP", r#"{"/a": "http://a:1"}"#)]))
        .is_err());
}

#[test]
fn test_cli_shadows_env() {
    let mut config = Config::default();
    config
        .apply_env_from(env(&[
            ("GONVEY_LOG_LEVEL", "ERROR"),
            ("GONVEY_SERVER_PORT", "9999"),
        ]))
        .unwrap();
    config
        .apply_overrides(&CliOverrides {
            log_level: Some("INFO".to_string()),
            port: Some(8080),
            ..CliOverrides::default()
        })
        .unwrap();

    assert_eq!(config.log_level, "INFO");
    assert_eq!(config.server_port, 8080);
}

#[test]
fn test_validate_rejects_unknown_log_level() {
    let config = Config {
        log_level: "VERBOSE".to_string(),
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_port() {
    let config = Config {
        server_port: 0,
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_empty_consul_address() {
    let config = Config {
        consul_address: String::new(),
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_proxy_map_encoding_round_trips() {
    let mut map = ProxyMap::new();
    map.insert(
        "/bloggo".to_string(),
        vec!["http://a:4242".to_string()],
    );
    map.insert(
        "/test".to_string(),
        vec![
            "http://b:4243".to_string(),
            "http://c:4244".to_string(),
            "http://d:4245".to_string(),
        ],
    );

    let encoded = encode_proxy_map(&map);
    let decoded = parse_proxy_map(&encoded).unwrap();
    assert_eq!(decoded, map);

    // Canonical encoding: re-encoding the decoded map is byte-identical.
    assert_eq!(encode_proxy_map(&decoded), encoded);
}

#[test]
fn test_registry_key_classification() {
    let by_key = |name: &str| KEYS.iter().find(|d| d.key == name).unwrap();

    let log_level = by_key("log_level");
    assert!(log_level.watched);
    assert!(!log_level.restart);

    let server_port = by_key("server_port");
    assert!(!server_port.watched);

    let proxy_map = by_key("proxy_map");
    assert!(proxy_map.watched);
    assert!(proxy_map.restart);
}

#[test]
fn test_registry_codecs_round_trip() {
    let config = Config {
        log_level: "WARNING".to_string(),
        server_port: 9090,
        proxy_map: parse_proxy_map(r#"{"/bloggo":["http://a:4242"]}"#).unwrap(),
        ..Config::default()
    };

    let mut decoded = Config::default();
    for def in KEYS {
        (def.decode)(&mut decoded, &(def.encode)(&config)).unwrap();
    }

    assert_eq!(decoded.log_level, config.log_level);
    assert_eq!(decoded.server_port, config.server_port);
    assert_eq!(decoded.proxy_map, config.proxy_map);
}

#[test]
fn test_registry_decoders_reject_garbage() {
    let mut config = Config::default();

    let server_port = KEYS.iter().find(|d| d.key == "server_port").unwrap();
    assert!((server_port.decode)(&mut config, "eight").is_err());

    let proxy_map = KEYS.iter().find(|d| d.key == "proxy_map").unwrap();
    assert!((proxy_map.decode)(&mut config, "{broken").is_err());
}
