use serde::Deserialize;
use std::fs::File;

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    /// Prefix prepended to every metric name
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "faultline".into()
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log filter used when RUST_LOG is not set (e.g. "info" or
    /// "ingest=debug")
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Statsd reporting; metrics are dropped when absent
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub ingest: ingest::config::Config,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                level: debug
            ingest:
                listener:
                    host: 0.0.0.0
                    port: 3000
                keys:
                    - project_id: 1
                      public_key: abc
                      secret_key: def
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_host, "127.0.0.1");
        assert_eq!(metrics.prefix, "faultline");
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.ingest.listener.host, "0.0.0.0");
        assert_eq!(config.ingest.keys.len(), 1);
        config.ingest.validate().expect("valid ingest config");
    }

    #[test]
    fn minimal_config() {
        let tmp = write_tmp_file("ingest: {}\n");
        let config = Config::from_file(tmp.path()).expect("load config");

        assert!(config.metrics.is_none());
        assert!(config.logging.level.is_none());
        assert_eq!(config.ingest.listener.port, 3000);
    }

    #[test]
    fn unparseable_config() {
        let tmp = write_tmp_file("ingest: [not, a, mapping]\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn missing_file() {
        let path = std::path::Path::new("/nonexistent/faultline.yaml");
        assert!(matches!(
            Config::from_file(path),
            Err(ConfigError::LoadError(_))
        ));
    }
}
