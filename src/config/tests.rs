use super::*;

fn minimal_raw() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.presets = BTreeMap::from([
        ("small".to_string(), "360x216".to_string()),
        ("thumb".to_string(), "170x230".to_string()),
    ]);
    raw.transformer.endpoint = Some("http://127.0.0.1:8088/transform".to_string());
    raw
}

fn expect_invalid(raw: RawSettings, expected_key: &str) {
    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, expected_key),
        other => panic!("expected invalid `{expected_key}`, got {other:?}"),
    }
}

#[test]
fn defaults_resolve_to_fs_storage() {
    let settings = Settings::from_raw(minimal_raw()).expect("valid settings");

    assert_eq!(settings.server.dispatcher_addr.port(), DEFAULT_DISPATCHER_PORT);
    assert_eq!(settings.server.guardian_addr.port(), DEFAULT_GUARDIAN_PORT);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.presets.len(), 2);
    assert!(settings.whitelist.is_empty());
    assert_eq!(settings.cache.capacity.get(), DEFAULT_CACHE_CAPACITY);
    assert_eq!(
        settings.cache.ttl,
        Some(Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    );

    match settings.storage {
        StorageSettings::Fs(fs) => {
            assert_eq!(fs.root, PathBuf::from(DEFAULT_STORAGE_ROOT));
            assert_eq!(fs.public_base_url, DEFAULT_FS_PUBLIC_BASE_URL);
            assert_eq!(fs.image_ttl_seconds, 0);
            assert_eq!(fs.reap_interval, Duration::from_secs(3_600));
        }
        other => panic!("unexpected storage: {other:?}"),
    }
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = minimal_raw();
    raw.server.dispatcher_port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.storage.root = Some(PathBuf::from("/srv/from-file"));

    let overrides = ServeOverrides {
        dispatcher_port: Some(4321),
        log_level: Some("debug".to_string()),
        storage: StorageOverrides {
            storage_root: Some(PathBuf::from("/srv/from-cli")),
            image_ttl_seconds: Some(600),
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.dispatcher_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    match settings.storage {
        StorageSettings::Fs(fs) => {
            assert_eq!(fs.root, PathBuf::from("/srv/from-cli"));
            assert_eq!(fs.image_ttl_seconds, 600);
        }
        other => panic!("unexpected storage: {other:?}"),
    }
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = minimal_raw();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn presets_are_required() {
    let mut raw = minimal_raw();
    raw.presets.clear();
    expect_invalid(raw, "presets");

    let mut raw = minimal_raw();
    raw.presets.insert("bad/name".to_string(), "1x1".to_string());
    expect_invalid(raw, "presets");
}

#[test]
fn transformer_endpoint_is_required() {
    let mut raw = minimal_raw();
    raw.transformer.endpoint = None;
    expect_invalid(raw, "transformer.endpoint");

    let mut raw = minimal_raw();
    raw.transformer.endpoint = Some("ftp://transformer".to_string());
    expect_invalid(raw, "transformer.endpoint");
}

#[test]
fn zero_ports_are_rejected() {
    let mut raw = minimal_raw();
    raw.server.guardian_port = Some(0);
    expect_invalid(raw, "server.guardian_port");
}

#[test]
fn object_storage_requires_endpoint_and_defaults_public_url() {
    let mut raw = minimal_raw();
    raw.storage.kind = Some("object".to_string());
    expect_invalid(raw.clone(), "storage.endpoint");

    raw.storage.endpoint = Some("https://bucket.s3.amazonaws.com".to_string());
    raw.storage.authorization = Some("Bearer secret".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");

    match settings.storage {
        StorageSettings::Object(object) => {
            assert_eq!(object.public_base_url, object.endpoint);
            assert_eq!(object.acl, DEFAULT_OBJECT_ACL);
            assert!(!format!("{object:?}").contains("secret"));
        }
        other => panic!("unexpected storage: {other:?}"),
    }
}

#[test]
fn unknown_storage_kind_is_rejected() {
    let mut raw = minimal_raw();
    raw.storage.kind = Some("tape".to_string());
    expect_invalid(raw, "storage.kind");
}

#[test]
fn invalid_whitelist_pattern_is_rejected() {
    let mut raw = minimal_raw();
    raw.whitelist = vec!["^https://ok/".to_string(), "(unclosed".to_string()];
    expect_invalid(raw, "whitelist");
}

#[test]
fn cache_ttl_zero_never_expires_and_capacity_is_clamped() {
    let mut raw = minimal_raw();
    raw.cache.capacity = Some(0);
    raw.cache.ttl_seconds = Some(0);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.capacity.get(), 1);
    assert_eq!(settings.cache.ttl, None);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["derivo"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_reap_arguments() {
    let args = CliArgs::parse_from([
        "derivo",
        "reap",
        "--storage-root",
        "/srv/derivatives",
        "--image-ttl-seconds",
        "-1",
    ]);

    match args.command.expect("reap command") {
        Command::Reap(reap) => {
            assert_eq!(
                reap.storage.storage_root.as_deref(),
                Some(std::path::Path::new("/srv/derivatives"))
            );
            assert_eq!(reap.storage.image_ttl_seconds, Some(-1));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "derivo",
        "serve",
        "--server-guardian-port",
        "7000",
        "--log-json",
        "true",
        "--transformer-endpoint",
        "http://transformer/",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.guardian_port, Some(7000));
            assert_eq!(serve.overrides.log_json, Some(true));
            assert_eq!(
                serve.overrides.transformer_endpoint.as_deref(),
                Some("http://transformer/")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}
