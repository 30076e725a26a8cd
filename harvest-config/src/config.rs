use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::events::{AppOverride, HarvestConfig, TransactionEventsConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => write!(f, " (file {})", file_name.display()),
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug, thiserror::Error)]
#[error("{kind}{origin}")]
pub struct ConfigError {
    kind: ConfigErrorKind,
    #[source]
    cause: Option<BoxError>,
    origin: ConfigErrorSource,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            kind,
            cause: None,
            origin: ConfigErrorSource::None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            kind,
            cause: Some(inner.into()),
            origin: ConfigErrorSource::None,
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Into<BoxError>,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.origin = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.origin = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
        }
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::to_writer(writer, self)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile)),
        }
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut options = fs::OpenOptions::new();
        options.write(true).truncate(true).create(true);

        let mut f = options
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        self.write(&mut f).map_err(|e| e.file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Configuration values that can be overridden from the command line or the environment.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The log level for harvest crates.
    pub log_level: Option<String>,
    /// Hostname and port of the statsd server.
    pub statsd: Option<String>,
    /// Global reservoir capacity per application.
    pub max_samples_stored: Option<String>,
    /// Interval between harvests in seconds.
    pub report_period: Option<String>,
}

/// Controls the metrics reported to statsd.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`, which disables metrics.
    #[serde(skip_serializing_if = "Option::is_none")]
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"harvest"`.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Global sample rate for all emitted metrics between `0.0` and `1.0`.
    ///
    /// Defaults to `1.0` (100%).
    sample_rate: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "harvest".into(),
            default_tags: BTreeMap::new(),
            sample_rate: 1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    logging: harvest_log::LogConfig,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    transaction_events: TransactionEventsConfig,
    #[serde(default)]
    harvest: HarvestConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    apps: BTreeMap<String, AppOverride>,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Minimal version of a config for dumping out.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct MinimalConfig {
    /// The transaction events section of the config.
    pub transaction_events: TransactionEventsConfig,
}

impl MinimalConfig {
    /// Saves the config in the given config folder as `config.yml`.
    pub fn save_in_folder<P: AsRef<Path>>(&self, p: P) -> Result<(), ConfigError> {
        let path = p.as_ref();
        if fs::metadata(path).is_err() {
            fs::create_dir_all(path)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        }
        self.save(path)
    }
}

impl ConfigObject for MinimalConfig {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path)?,
            path,
        })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(&mut self, overrides: OverridableConfig) -> Result<&mut Self, ConfigError> {
        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(statsd) = overrides.statsd {
            self.values.metrics.statsd = Some(statsd).filter(|s| !s.is_empty());
        }

        if let Some(max) = overrides.max_samples_stored {
            self.values.transaction_events.max_samples_stored = max
                .parse()
                .map_err(|err| ConfigError::for_field(err, "max_samples_stored"))?;
        }

        if let Some(period) = overrides.report_period {
            let period: u64 = period
                .parse()
                .map_err(|err| ConfigError::for_field(err, "report_period"))?;
            if period == 0 {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("report_period"));
            }
            self.values.harvest.report_period = period;
        }

        Ok(self)
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &harvest_log::LogConfig {
        &self.values.logging
    }

    /// Returns the address of the statsd server, if metrics are enabled.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix for all metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for all metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the global sample rate for all metrics.
    pub fn metrics_sample_rate(&self) -> f64 {
        self.values.metrics.sample_rate
    }

    /// Returns the global transaction event settings, without per-app overrides.
    pub fn default_transaction_events(&self) -> TransactionEventsConfig {
        self.values.transaction_events
    }

    /// Resolves the transaction event settings for an application.
    ///
    /// Applications without an entry in the `apps` section use the global settings.
    pub fn transaction_events(&self, app_name: &str) -> TransactionEventsConfig {
        let defaults = self.values.transaction_events;
        match self.values.apps.get(app_name) {
            Some(app) => app.apply(defaults),
            None => defaults,
        }
    }

    /// Returns the override for an application, if one is configured.
    pub fn app_override(&self, app_name: &str) -> Option<&AppOverride> {
        self.values.apps.get(app_name)
    }

    /// Sets or replaces the override for an application.
    pub fn set_app_override(&mut self, app_name: impl Into<String>, app: AppOverride) {
        self.values.apps.insert(app_name.into(), app);
    }

    /// Returns the names of all applications with overrides.
    pub fn app_names(&self) -> impl Iterator<Item = &str> {
        self.values.apps.keys().map(String::as_str)
    }

    /// Returns the harvest cycle settings.
    pub fn harvest(&self) -> &HarvestConfig {
        &self.values.harvest
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::UnexpectedErrorPolicy;

    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        insta::assert_snapshot!(config.to_yaml_string().unwrap(), @r###"
        logging:
          level: info
          format: auto
          enable_backtraces: false
        metrics:
          prefix: harvest
          default_tags: {}
          sample_rate: 1.0
        transaction_events:
          enabled: true
          max_samples_stored: 2000
          target_samples_stored: 10
        harvest:
          report_period: 60
          unexpected_errors: discard
          synthetics:
            max_events_per_app: 200
            max_pending_batches: 25
            max_batches_per_harvest: 5
        "###);
    }

    #[test]
    fn test_app_overrides() {
        let config = Config::from_json_value(serde_json::json!({
            "transaction_events": {
                "max_samples_stored": 100
            },
            "apps": {
                "checkout": {
                    "enabled": false
                },
                "search": {
                    "max_samples_stored": 50,
                    "target_samples_stored": 5
                }
            }
        }))
        .unwrap();

        similar_asserts::assert_eq!(
            config.transaction_events("checkout"),
            TransactionEventsConfig {
                enabled: false,
                max_samples_stored: 100,
                target_samples_stored: 10,
            }
        );
        similar_asserts::assert_eq!(
            config.transaction_events("search"),
            TransactionEventsConfig {
                enabled: true,
                max_samples_stored: 50,
                target_samples_stored: 5,
            }
        );
        similar_asserts::assert_eq!(
            config.transaction_events("unknown"),
            config.default_transaction_events()
        );
    }

    #[test]
    fn test_harvest_section() {
        let config = Config::from_json_value(serde_json::json!({
            "harvest": {
                "report_period": 5,
                "unexpected_errors": "retry",
                "synthetics": {
                    "max_pending_batches": 2
                }
            }
        }))
        .unwrap();

        let harvest = config.harvest();
        assert_eq!(harvest.report_period(), Duration::from_secs(5));
        assert_eq!(harvest.unexpected_errors, UnexpectedErrorPolicy::Retry);
        assert_eq!(harvest.synthetics.max_pending_batches, 2);
        assert_eq!(harvest.synthetics.max_batches_per_harvest, 5);
    }

    #[test]
    fn test_bad_json() {
        let err = Config::from_json_value(serde_json::json!({
            "transaction_events": { "max_samples_stored": "many" }
        }))
        .unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::BadJson);
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                log_level: Some("debug".to_owned()),
                statsd: Some("127.0.0.1:8125".to_owned()),
                max_samples_stored: Some("42".to_owned()),
                report_period: None,
            })
            .unwrap();

        assert_eq!(config.logging().level.to_string(), "debug");
        assert_eq!(config.statsd_addr(), Some("127.0.0.1:8125"));
        assert_eq!(config.transaction_events("any").max_samples_stored, 42);
    }

    #[test]
    fn test_apply_override_invalid() {
        let mut config = Config::default();
        let err = config
            .apply_override(OverridableConfig {
                report_period: Some("0".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(err.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(err.to_string(), "invalid config value (field report_period)");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("nested");

        MinimalConfig::default().save_in_folder(&folder).unwrap();
        assert!(Config::config_exists(&folder));

        let config = Config::from_path(&folder).unwrap();
        similar_asserts::assert_eq!(
            config.default_transaction_events(),
            TransactionEventsConfig::default()
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::CouldNotOpenFile);
    }
}
