use base64::{engine::general_purpose::STANDARD, Engine as _};
use faas_supervisor::load_config::{load_config, locate_config, ConfigSource, FUNCTION_CONFIG_VAR};
use std::collections::HashMap;
use std::fs::write;
use tempfile::NamedTempFile;

const CONFIG_YAML: &str = r#"
name: grayify
input:
  - storage_provider: minio.default
    path: grayify/in
output:
  - storage_provider: minio.default
    path: grayify/out
    suffix: [.jpg, .png]
log_level: INFO
"#;

#[test]
fn loads_explicit_file() {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), CONFIG_YAML).unwrap();
    let config = load_config(Some(file.path()), &HashMap::new()).expect("Config should load");
    assert_eq!(config.name.as_deref(), Some("grayify"));
    assert_eq!(config.output[0].suffix.len(), 2);
    assert!(config.download_input_enabled());
}

#[test]
fn decodes_base64_from_env() {
    let env = HashMap::from([(FUNCTION_CONFIG_VAR.to_string(), STANDARD.encode(CONFIG_YAML))]);
    let config = load_config(None, &env).expect("Config should load");
    assert_eq!(config.input[0].path, "grayify/in");
}

#[test]
fn env_knobs_override_document() {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), CONFIG_YAML).unwrap();
    let env = HashMap::from([
        ("LOG_LEVEL".to_string(), "DEBUG".to_string()),
        ("DOWNLOAD_INPUT".to_string(), "false".to_string()),
    ]);
    let config = load_config(Some(file.path()), &env).unwrap();
    assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
    assert!(!config.download_input_enabled());
}

#[test]
fn missing_everything_is_empty_config() {
    if std::path::Path::new(faas_supervisor::load_config::DEFAULT_CONFIG_PATH).exists() {
        return;
    }
    assert_eq!(locate_config(None, &HashMap::new()), ConfigSource::Empty);
    let config = load_config(None, &HashMap::new()).unwrap();
    assert!(config.output.is_empty());
}

#[test]
fn unreadable_file_and_bad_yaml_fail() {
    let err = load_config(Some(std::path::Path::new("/does/not/exist.yaml")), &HashMap::new())
        .unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));

    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), "output: [not, a, rule").unwrap();
    let err = load_config(Some(file.path()), &HashMap::new()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}
