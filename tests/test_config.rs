use std::io::Write;
use std::path::Path;
use std::time::Duration;

use liso::config::Config;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.max_connections, 512);
    assert_eq!(cfg.server.idle_timeout(), Duration::from_secs(3));
    assert_eq!(cfg.server.max_request_bytes, 1024 * 1024);
    assert_eq!(cfg.static_files.root, Path::new("./static_site"));
    assert!(cfg.tls.is_none());
    assert!(cfg.cgi.is_none());
}

#[test]
fn test_config_partial_yaml_keeps_defaults() {
    let cfg = Config::from_yaml_str("server:\n  max_connections: 8\n").unwrap();

    assert_eq!(cfg.server.max_connections, 8);
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.idle_timeout_secs, 3);
}

#[test]
fn test_config_full_yaml() {
    let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
  idle_timeout_secs: 10
static_files:
  root: /srv/www
tls:
  listen_addr: "0.0.0.0:9443"
  cert: /etc/liso/cert.pem
  key: /etc/liso/key.pem
cgi:
  program: /srv/cgi/app.py
"#;
    let cfg = Config::from_yaml_str(yaml).unwrap();

    assert_eq!(cfg.server.listen_addr, "0.0.0.0:9000");
    assert_eq!(cfg.static_files.root, Path::new("/srv/www"));

    let tls = cfg.tls.unwrap();
    assert_eq!(tls.listen_addr, "0.0.0.0:9443");
    assert_eq!(tls.key, Path::new("/etc/liso/key.pem"));

    let cgi = cfg.cgi.unwrap();
    assert_eq!(cgi.prefix, "/cgi/");
    assert_eq!(cgi.program, Path::new("/srv/cgi/app.py"));
    assert_eq!(cgi.max_output_bytes, 8 * 1024 * 1024);
}

#[test]
fn test_config_cgi_output_limit() {
    let yaml = "cgi:\n  program: /srv/cgi/app.py\n  max_output_bytes: 4096\n";
    let cfg = Config::from_yaml_str(yaml).unwrap();

    assert_eq!(cfg.cgi.unwrap().max_output_bytes, 4096);
}

#[test]
fn test_config_rejects_zero_connections() {
    assert!(Config::from_yaml_str("server:\n  max_connections: 0\n").is_err());
}

#[test]
fn test_config_tls_requires_cert_and_key() {
    assert!(Config::from_yaml_str("tls:\n  listen_addr: \"127.0.0.1:1\"\n").is_err());
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "static_files:\n  root: /tmp/site").unwrap();

    let cfg = Config::from_file(file.path()).unwrap();
    assert_eq!(cfg.static_files.root, Path::new("/tmp/site"));

    assert!(Config::from_file(Path::new("/nonexistent/liso.yaml")).is_err());
}

#[test]
fn test_config_listen_env_override() {
    unsafe {
        std::env::remove_var("LISO_CONFIG");
        std::env::set_var("LISTEN", "0.0.0.0:3000");
    }
    let cfg = Config::load().unwrap();
    unsafe {
        std::env::remove_var("LISTEN");
    }

    assert_eq!(cfg.server.listen_addr, "0.0.0.0:3000");
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.server.listen_addr, cfg2.server.listen_addr);
}
