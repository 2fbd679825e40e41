use std::path::PathBuf;

use ember::config::{Config, IdlePolicy};

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.base_dir, PathBuf::from("/var/www/html"));
    assert_eq!(cfg.handler_prefix, "/cgi-bin/");
    assert_eq!(cfg.max_connections, 12);
    assert_eq!(cfg.max_handlers, 256);
    assert_eq!(cfg.heap_body_limit, 1024 * 1024);
    assert_eq!(cfg.idle_policy, IdlePolicy::Sweep);
    assert_eq!(cfg.module_dir(), PathBuf::from("/var/www/html/cgi-bin"));
    assert!(cfg.server_name.starts_with("ember/"));
}

#[test]
fn test_config_env_overrides() {
    // Both overrides in one test: the environment is process-wide.
    unsafe {
        std::env::remove_var("EMBER_CONFIG");
        std::env::set_var("LISTEN", "0.0.0.0:3000");
        std::env::set_var("EMBER_BASE", "/srv/ember");
    }
    let cfg = Config::load().unwrap();
    unsafe {
        std::env::remove_var("LISTEN");
        std::env::remove_var("EMBER_BASE");
    }

    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
    assert_eq!(cfg.base_dir, PathBuf::from("/srv/ember"));
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml(
        "listen_addr: \"0.0.0.0:9000\"\n\
         max_connections: 64\n\
         idle_policy: per-connection\n\
         preload:\n  - demo.so\n",
    )
    .unwrap();

    assert_eq!(cfg.listen_addr, "0.0.0.0:9000");
    assert_eq!(cfg.max_connections, 64);
    assert_eq!(cfg.idle_policy, IdlePolicy::PerConnection);
    assert_eq!(cfg.preload, vec!["demo.so".to_string()]);
    // Unset fields keep their defaults.
    assert_eq!(cfg.poll_timeout_ms, 3000);
}

#[test]
fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ember.yaml");
    std::fs::write(&path, "base_dir: /tmp/site\nmodule_dir_name: mods\n").unwrap();

    let cfg = Config::from_file(&path).unwrap();

    assert_eq!(cfg.module_dir(), PathBuf::from("/tmp/site/mods"));
}

#[test]
fn test_config_rejects_invalid_values() {
    assert!(Config::from_yaml("handler_prefix: cgi\n").is_err());
    assert!(Config::from_yaml("max_connections: 0\n").is_err());
    assert!(Config::from_yaml("poll_timeout_ms: 0\n").is_err());
    assert!(Config::from_yaml("idle_policy: never\n").is_err());
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.listen_addr, cfg2.listen_addr);
}
