use chatstream::config::ClientConfig;
use chatstream::identity::{IdentityError, IdentityProvider};
use serial_test::serial;
use std::env;
use std::fs;

// Variables read by the loader; tests run serially and reset them first.
const VARS: &[&str] = &[
    "CONFIG_FILE",
    "CHAT_ENDPOINT_URL",
    "CHAT_TOKEN",
    "CHAT_TOKEN_FILE",
    "LOG_JSON",
    "CHATSTREAM_ENDPOINT__URL",
    "CHATSTREAM_ENDPOINT__TOKEN_PARAM",
    "CHATSTREAM_IDENTITY__TOKEN",
    "CHATSTREAM_IDENTITY__TOKEN_FILE",
    "CHATSTREAM_IDENTITY__REFRESH_SKEW_SECS",
    "CHATSTREAM_SESSION__TERMINATORS",
    "CHATSTREAM_LOG__JSON",
];

fn clear_env_vars() {
    unsafe {
        for var in VARS {
            env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = ClientConfig::load_from_args(["chatstream"]).expect("defaults should load");
    assert_eq!(config.endpoint.url, "ws://127.0.0.1:3000/ws");
    assert_eq!(config.endpoint.token_param, "token");
    assert_eq!(config.identity.refresh_skew_secs, 60);
    assert!(config.identity.token.is_none());
    assert!(config.identity.token_file.is_none());
    assert!(config.session.terminators.is_empty());
    assert!(!config.log.json);
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("CHATSTREAM_ENDPOINT__URL", "wss://chat.example.com/dev");
        env::set_var("CHATSTREAM_IDENTITY__REFRESH_SKEW_SECS", "5");
        env::set_var("CHATSTREAM_SESSION__TERMINATORS", "EOS,END");
    }

    let config = ClientConfig::load_from_args(["chatstream"]).expect("Failed to load config");
    assert_eq!(config.endpoint.url, "wss://chat.example.com/dev");
    assert_eq!(config.identity.refresh_skew_secs, 5);
    assert_eq!(config.session.terminators, ["EOS", "END"]);

    let terminators = config.session_options().terminators;
    assert!(terminators.is_terminator("[DONE]"));
    assert!(terminators.is_terminator("EOS"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.yaml");
    fs::write(
        &path,
        r#"
endpoint:
  url: wss://file.example.com/prod
  token_param: id_token
log:
  json: true
"#,
    )
    .unwrap();

    let config = ClientConfig::load_from_args(["chatstream", "--config", path.to_str().unwrap()])
        .expect("Failed to load config from file");
    assert_eq!(config.endpoint.url, "wss://file.example.com/prod");
    assert_eq!(config.endpoint.token_param, "id_token");
    assert!(config.log.json);
    // Untouched sections keep their defaults.
    assert_eq!(config.identity.refresh_skew_secs, 60);
}

#[test]
#[serial]
fn test_config_file_from_env() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.yaml");
    fs::write(&path, "endpoint:\n  url: ws://localhost:9000/chat\n").unwrap();
    unsafe {
        env::set_var("CONFIG_FILE", path.to_str().unwrap());
    }

    let config = ClientConfig::load_from_args(["chatstream"]).unwrap();
    assert_eq!(config.endpoint.url, "ws://localhost:9000/chat");

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_config_file_is_an_error() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");

    let result = ClientConfig::load_from_args(["chatstream", "-c", path.to_str().unwrap()]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cli_overrides_env() {
    clear_env_vars();
    unsafe {
        env::set_var("CHATSTREAM_ENDPOINT__URL", "wss://env.example.com/");
    }

    let config = ClientConfig::load_from_args([
        "chatstream",
        "--endpoint",
        "wss://cli.example.com/",
        "--log-json",
        "true",
    ])
    .unwrap();
    assert_eq!(config.endpoint.url, "wss://cli.example.com/");
    assert!(config.log.json);

    clear_env_vars();
}

#[test]
#[serial]
fn test_rejects_non_websocket_endpoint() {
    clear_env_vars();

    let err = ClientConfig::load_from_args(["chatstream", "--endpoint", "https://example.com/"])
        .unwrap_err();
    assert!(err.to_string().contains("ws or wss"));
}

#[tokio::test]
#[serial]
async fn test_identity_provider_from_token() {
    clear_env_vars();

    let config = ClientConfig::load_from_args(["chatstream", "--token", "abc"]).unwrap();
    let credential = config.identity_provider().get_credential().await.unwrap();
    assert_eq!(credential.expose(), "abc");
}

#[tokio::test]
#[serial]
async fn test_identity_provider_prefers_token_file() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token");
    fs::write(&path, "from-file\n").unwrap();

    let config = ClientConfig::load_from_args([
        "chatstream",
        "--token",
        "from-flag",
        "--token-file",
        path.to_str().unwrap(),
    ])
    .unwrap();
    let credential = config.identity_provider().get_credential().await.unwrap();
    assert_eq!(credential.expose(), "from-file");
}

#[tokio::test]
#[serial]
async fn test_token_file_from_env() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token");
    fs::write(&path, "env-file-token").unwrap();
    unsafe {
        env::set_var("CHATSTREAM_IDENTITY__TOKEN_FILE", path.to_str().unwrap());
    }

    let config = ClientConfig::load_from_args(["chatstream"]).unwrap();
    assert_eq!(config.identity.token_file.as_deref(), Some(path.as_path()));
    let credential = config.identity_provider().get_credential().await.unwrap();
    assert_eq!(credential.expose(), "env-file-token");

    clear_env_vars();
    let config = ClientConfig::load_from_args(["chatstream"]).unwrap();
    assert!(config.identity.token_file.is_none());
}

#[tokio::test]
#[serial]
async fn test_identity_provider_without_source() {
    clear_env_vars();

    let config = ClientConfig::load_from_args(["chatstream"]).unwrap();
    let err = config.identity_provider().get_credential().await.unwrap_err();
    assert!(matches!(err, IdentityError::NoCredential(_)));
}
