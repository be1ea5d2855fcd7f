use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), DEFAULT_PUBLIC_PORT);
    assert_eq!(settings.server.admin_addr.port(), DEFAULT_ADMIN_PORT);
    assert_eq!(settings.feed.page_size.get(), 10);
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.index_ttl, Duration::from_secs(20));
    assert_eq!(settings.auth.user_header.as_str(), "x-forwarded-user");
    assert_eq!(settings.auth.login_path, "/auth/login/");
    assert_eq!(
        settings.uploads.max_request_bytes.get(),
        DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES
    );
}

#[test]
fn zero_page_size_is_rejected() {
    let mut raw = RawSettings::default();
    raw.feed.page_size = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero page size");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "feed.page_size",
            ..
        }
    ));
}

#[test]
fn zero_cache_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.index_ttl_seconds = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero ttl");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.index_ttl_seconds",
            ..
        }
    ));
}

#[test]
fn login_path_must_be_absolute() {
    let mut raw = RawSettings::default();
    raw.auth.login_path = Some("auth/login/".to_string());

    let err = Settings::from_raw(raw).expect_err("relative login path");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "auth.login_path",
            ..
        }
    ));
}

#[test]
fn malformed_user_header_is_rejected() {
    let mut raw = RawSettings::default();
    raw.auth.user_header = Some("not a header".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn listeners_must_not_collide() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(8080);
    raw.server.admin_port = Some(8080);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_can_disable_cache() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        cache_enabled: Some(false),
        cache_index_ttl_seconds: Some(5),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(!settings.cache.enabled);
    assert_eq!(settings.cache.index_ttl, Duration::from_secs(5));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["quill"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_migrate_arguments() {
    let args = CliArgs::parse_from(["quill", "migrate", "--database-url", "postgres://example"]);

    match args.command.expect("migrate command") {
        Command::Migrate(migrate) => {
            assert_eq!(
                migrate.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_group_create_arguments() {
    let args = CliArgs::parse_from([
        "quill",
        "groups",
        "create",
        "--title",
        "Book Club",
        "--description",
        "Reading together",
    ]);

    match args.command.expect("groups command") {
        Command::Groups(groups) => match groups.command {
            GroupsCommand::Create(create) => {
                assert_eq!(create.title, "Book Club");
                assert_eq!(create.slug, None);
                assert_eq!(create.description, "Reading together");
            }
        },
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "quill",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--database-url",
        "postgres://override",
        "--feed-page-size",
        "25",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.database_url.as_deref(),
                Some("postgres://override")
            );
            assert_eq!(serve.overrides.feed_page_size, Some(25));
        }
        _ => panic!("wrong command parsed"),
    }
}
