//! Job file: one TOML document describing stores, columns and the meta key.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use xetra_core::config::{ConfigError as ColumnConfigError, SourceConfig, TargetConfig};
use xetra_core::store::{LocalStore, ObjectStore};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read job file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse job file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid job file: {0}")]
    Invalid(#[from] ColumnConfigError),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("the s3 store kind requires building with the `s3` feature")]
    S3Disabled,

    #[error("store error: {0}")]
    Store(#[from] xetra_core::StoreError),
}

fn default_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_region() -> String {
    "eu-central-1".into()
}

fn default_access_key_env() -> String {
    "AWS_ACCESS_KEY_ID".into()
}

fn default_secret_key_env() -> String {
    "AWS_SECRET_ACCESS_KEY".into()
}

/// Where a bucket lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// A local directory used as a bucket; keys are relative paths.
    Local { root: PathBuf },

    /// S3-compatible bucket. Credentials are read from the named environment
    /// variables when the store is connected.
    S3 {
        endpoint_url: String,
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default = "default_access_key_env")]
        access_key_env: String,
        #[serde(default = "default_secret_key_env")]
        secret_key_env: String,
    },
}

impl StoreConfig {
    /// Open the backend described by this entry.
    ///
    /// A relative `root` is resolved against `base` (the job file's directory).
    pub fn connect(&self, base: &Path) -> Result<Arc<dyn ObjectStore>, ConfigError> {
        match self {
            StoreConfig::Local { root } => {
                let root = if root.is_absolute() {
                    root.clone()
                } else {
                    base.join(root)
                };
                Ok(Arc::new(LocalStore::new(root)))
            }
            StoreConfig::S3 {
                endpoint_url,
                bucket,
                region,
                access_key_env,
                secret_key_env,
            } => connect_s3(endpoint_url, bucket, region, access_key_env, secret_key_env),
        }
    }
}

fn env_var(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_string()))
}

#[cfg(feature = "s3")]
fn connect_s3(
    endpoint_url: &str,
    bucket: &str,
    region: &str,
    access_key_env: &str,
    secret_key_env: &str,
) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    use xetra_core::store::{S3Settings, S3Store};

    let settings = S3Settings {
        endpoint_url: endpoint_url.to_string(),
        bucket: bucket.to_string(),
        region: region.to_string(),
        access_key_id: env_var(access_key_env)?,
        secret_access_key: env_var(secret_key_env)?,
    };
    Ok(Arc::new(S3Store::new(settings)?))
}

#[cfg(not(feature = "s3"))]
fn connect_s3(
    _endpoint_url: &str,
    _bucket: &str,
    _region: &str,
    access_key_env: &str,
    secret_key_env: &str,
) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    env_var(access_key_env)?;
    env_var(secret_key_env)?;
    Err(ConfigError::S3Disabled)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Key of the meta CSV file in the target bucket.
    pub meta_key: String,
}

/// Everything one run of the daily report job needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub source_store: StoreConfig,
    pub target_store: StoreConfig,
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub meta: MetaConfig,
}

impl JobConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: JobConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate()?;
        self.target.validate()?;
        if self.meta.meta_key.is_empty() {
            return Err(ColumnConfigError::Empty("meta.meta_key").into());
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::JOB_TOML;
    use super::*;
    use xetra_core::TextEncoding;

    #[test]
    fn parses_full_job_file() {
        let job = JobConfig::from_toml(JOB_TOML).unwrap();
        assert_eq!(job.logging.level, "debug");
        assert_eq!(
            job.source_store,
            StoreConfig::Local {
                root: PathBuf::from("src")
            }
        );
        assert_eq!(job.source.encoding, TextEncoding::Utf8);
        assert_eq!(job.source.delimiter, ',');
        assert_eq!(job.target.format, "parquet");
        assert_eq!(job.meta.meta_key, "meta/report1/xetra_report1_meta_file.csv");
    }

    #[test]
    fn logging_section_is_optional() {
        let content = JOB_TOML.replace("[logging]\nlevel = \"debug\"\n", "");
        let job = JobConfig::from_toml(&content).unwrap();
        assert_eq!(job.logging.level, "info");
    }

    #[test]
    fn s3_store_defaults() {
        let content = JOB_TOML.replace(
            "[target_store]\nkind = \"local\"\nroot = \"trg\"",
            "[target_store]\nkind = \"s3\"\nendpoint_url = \"https://s3.eu-central-1.amazonaws.com\"\nbucket = \"xetra-reports\"",
        );
        let job = JobConfig::from_toml(&content).unwrap();
        match job.target_store {
            StoreConfig::S3 {
                bucket,
                region,
                access_key_env,
                ..
            } => {
                assert_eq!(bucket, "xetra-reports");
                assert_eq!(region, "eu-central-1");
                assert_eq!(access_key_env, "AWS_ACCESS_KEY_ID");
            }
            other => panic!("expected s3 store, got {other:?}"),
        }
    }

    #[test]
    fn unknown_store_kind_is_a_parse_error() {
        let content = JOB_TOML.replace("kind = \"local\"\nroot = \"src\"", "kind = \"ftp\"");
        assert!(matches!(
            JobConfig::from_toml(&content),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn invalid_columns_fail_validation() {
        let content = JOB_TOML.replace("format = \"parquet\"", "format = \"xlsx\"");
        assert!(matches!(
            JobConfig::from_toml(&content),
            Err(ConfigError::Invalid(ColumnConfigError::UnsupportedFormat(_)))
        ));
    }

    #[test]
    fn empty_meta_key_fails_validation() {
        let content = JOB_TOML.replace(
            "meta_key = \"meta/report1/xetra_report1_meta_file.csv\"",
            "meta_key = \"\"",
        );
        assert!(matches!(
            JobConfig::from_toml(&content),
            Err(ConfigError::Invalid(ColumnConfigError::Empty(_)))
        ));
    }

    #[test]
    fn relative_local_root_resolves_against_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/2022-11-17")).unwrap();
        std::fs::write(dir.path().join("src/2022-11-17/a.csv"), "x\n1\n").unwrap();

        let store = StoreConfig::Local {
            root: PathBuf::from("src"),
        }
        .connect(dir.path())
        .unwrap();
        assert_eq!(store.list_keys("2022-11-17").unwrap(), vec!["2022-11-17/a.csv"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = JobConfig::from_file(Path::new("/nonexistent/job.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
