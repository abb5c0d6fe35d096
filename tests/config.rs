// ABOUTME: Integration tests for configuration parsing and validation.
// ABOUTME: Tests YAML parsing, env var interpolation, and session settings per flow.

use checkflux::config::*;
use checkflux::error::Error;
use checkflux::flux::ProbeTool;
use std::path::PathBuf;
use std::time::Duration;

mod parsing {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let yaml = r#"
flows:
  - src: bastion.example.com
    dst: db.internal
    port: 5432
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.flows.len(), 1);
        assert_eq!(config.flows.head.src.host, "bastion.example.com");
        assert_eq!(config.flows.head.expect, Expectation::Open);
        assert_eq!(config.defaults.port, 22);
        assert_eq!(config.defaults.connect_timeout, Duration::from_secs(3));
        assert!(config.defaults.trust_first_connection);
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
defaults:
  user: ops
  port: 2200
  password: hunter2
  key_path: /keys/id_ed25519
  look_for_keys: true
  allow_agent: true
  trust_first_connection: false
  known_hosts: /tmp/known_hosts
  connect_timeout: 500ms
  tool: bash
  wait: 2s

flows:
  - src: admin@web1.example.com:2222
    dst: 10.0.0.5
    port: 443
  - src:
      host: web2.example.com
      user: deploy
      port: 2022
    dst: 10.0.0.6
    port: 23
    expect: closed
    tool: nc
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let defaults = &config.defaults;
        assert_eq!(defaults.user.as_deref(), Some("ops"));
        assert_eq!(defaults.port, 2200);
        assert_eq!(
            defaults.password,
            Some(EnvValue::Literal("hunter2".to_string()))
        );
        assert_eq!(defaults.key_path, Some(PathBuf::from("/keys/id_ed25519")));
        assert!(defaults.look_for_keys);
        assert!(defaults.allow_agent);
        assert!(!defaults.trust_first_connection);
        assert_eq!(defaults.connect_timeout, Duration::from_millis(500));
        assert_eq!(defaults.tool, ProbeTool::BashTcp);
        assert_eq!(defaults.wait, Duration::from_secs(2));

        let first = &config.flows.head;
        assert_eq!(first.src.user.as_deref(), Some("admin"));
        assert_eq!(first.src.port, Some(2222));
        assert_eq!(first.tool, None);

        let second = config.flows.last();
        assert_eq!(second.src.host, "web2.example.com");
        assert_eq!(second.src.user.as_deref(), Some("deploy"));
        assert_eq!(second.expect, Expectation::Closed);
        assert_eq!(second.tool, Some(ProbeTool::Netcat));
    }

    #[test]
    fn empty_flow_list_returns_error() {
        let yaml = r#"
flows: []
"#;
        let result = Config::from_yaml(yaml);
        assert!(matches!(result, Err(Error::Yaml(_))));
    }

    #[test]
    fn missing_port_returns_error() {
        let yaml = r#"
flows:
  - src: bastion
    dst: db
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn bad_source_string_returns_error() {
        let yaml = r#"
flows:
  - src: "bastion:notaport"
    dst: db
    port: 5432
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn unknown_expectation_returns_error() {
        let yaml = r#"
flows:
  - src: bastion
    dst: db
    port: 5432
    expect: maybe
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }
}

mod probes {
    use super::*;

    #[test]
    fn flow_tool_overrides_default() {
        let yaml = r#"
defaults:
  tool: bash
  wait: 5s
flows:
  - src: bastion
    dst: db
    port: 5432
  - src: bastion
    dst: cache
    port: 6379
    tool: netcat
"#;
        let config = Config::from_yaml(yaml).unwrap();

        let first = config.flux_check(&config.flows.head).unwrap();
        assert_eq!(first.probe_command(), "timeout 5 bash -c '</dev/tcp/db/5432'");

        let second = config.flux_check(config.flows.last()).unwrap();
        assert_eq!(second.probe_command(), "nc -z -w 5 cache 6379");
    }

    #[test]
    fn invalid_destination_is_rejected_when_building_the_probe() {
        let yaml = r#"
flows:
  - src: bastion
    dst: "db; rm -rf /"
    port: 5432
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let result = config.flux_check(&config.flows.head);
        assert!(matches!(result, Err(Error::Flux(_))));
    }
}

mod sessions {
    use super::*;

    fn server(s: &str) -> ServerConfig {
        ServerConfig::parse(s).unwrap()
    }

    #[test]
    fn server_values_win_over_defaults() {
        let defaults = Defaults {
            user: Some("ops".to_string()),
            port: 2200,
            ..Defaults::default()
        };

        let config = defaults.session_config(&server("admin@web1:2222")).unwrap();

        assert_eq!(config.host, "web1");
        assert_eq!(config.user, "admin");
        assert_eq!(config.port, 2222);
    }

    #[test]
    fn defaults_fill_the_gaps() {
        let defaults = Defaults {
            user: Some("ops".to_string()),
            port: 2200,
            key_path: Some(PathBuf::from("/keys/id")),
            known_hosts: Some(PathBuf::from("/tmp/kh")),
            allow_agent: true,
            trust_first_connection: false,
            connect_timeout: Duration::from_secs(7),
            ..Defaults::default()
        };

        let config = defaults.session_config(&server("web1")).unwrap();

        assert_eq!(config.user, "ops");
        assert_eq!(config.port, 2200);
        assert_eq!(config.key_path, Some(PathBuf::from("/keys/id")));
        assert_eq!(config.known_hosts_path, Some(PathBuf::from("/tmp/kh")));
        assert!(config.allow_agent);
        assert!(!config.trust_on_first_use);
        assert_eq!(config.connect_timeout, Duration::from_secs(7));
        assert_eq!(config.password, None);
    }

    #[test]
    fn user_falls_back_to_environment() {
        temp_env::with_var("USER", Some("from_env_user"), || {
            let config = Defaults::default()
                .session_config(&server("web1"))
                .unwrap();
            assert_eq!(config.user, "from_env_user");
        });
    }

    #[test]
    fn user_falls_back_to_root() {
        temp_env::with_var_unset("USER", || {
            let config = Defaults::default()
                .session_config(&server("web1"))
                .unwrap();
            assert_eq!(config.user, "root");
        });
    }

    #[test]
    fn password_is_read_from_environment() {
        let defaults = Defaults {
            password: Some(EnvValue::from_env("CHECKFLUX_TEST_PASSWORD")),
            ..Defaults::default()
        };

        temp_env::with_var("CHECKFLUX_TEST_PASSWORD", Some("s3cret"), || {
            let config = defaults.session_config(&server("web1")).unwrap();
            assert_eq!(config.password.as_deref(), Some("s3cret"));
        });
    }

    #[test]
    fn missing_password_variable_is_an_error() {
        let defaults = Defaults {
            password: Some(EnvValue::from_env("CHECKFLUX_TEST_UNSET")),
            ..Defaults::default()
        };

        temp_env::with_var_unset("CHECKFLUX_TEST_UNSET", || {
            let err = defaults.session_config(&server("web1")).unwrap_err();
            assert!(matches!(err, Error::MissingEnvVar(var) if var == "CHECKFLUX_TEST_UNSET"));
        });
    }
}

mod env_values {
    use super::*;

    #[test]
    fn env_reference_with_default_parses() {
        let value: EnvValue = serde_yaml::from_str("{ env: CHECKFLUX_TEST_DEFAULTED, default: fallback }").unwrap();

        temp_env::with_var_unset("CHECKFLUX_TEST_DEFAULTED", || {
            assert_eq!(value.resolve().unwrap(), "fallback");
        });
        temp_env::with_var("CHECKFLUX_TEST_DEFAULTED", Some("set"), || {
            assert_eq!(value.resolve().unwrap(), "set");
        });
    }

    #[test]
    fn debug_output_redacts_literals() {
        let value = EnvValue::Literal("hunter2".to_string());
        assert!(!format!("{value:?}").contains("hunter2"));
    }
}

mod discovery {
    use super::*;

    const MINIMAL: &str = "flows:\n  - src: bastion\n    dst: db\n    port: 5432\n";

    #[test]
    fn finds_primary_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), MINIMAL).unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.flows.head.dst, "db");
    }

    #[test]
    fn finds_file_in_dot_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".checkflux")).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME_DIR), MINIMAL).unwrap();

        assert!(Config::discover(dir.path()).is_ok());
    }

    #[test]
    fn missing_file_is_config_not_found() {
        let dir = tempfile::tempdir().unwrap();

        let err = Config::discover(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn init_writes_loadable_template() {
        let dir = tempfile::tempdir().unwrap();

        let path = init_config(dir.path(), false).unwrap();
        assert!(Config::load(&path).is_ok());

        let err = init_config(dir.path(), false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(init_config(dir.path(), true).is_ok());
    }
}
