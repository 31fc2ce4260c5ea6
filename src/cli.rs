//! Command-line arguments.
//!
//! Besides the regular flags, three hidden legacy flags (`--ding.profile`,
//! `--ding.timeout`, `--template.file`) describe a whole configuration on the
//! command line. When any of them is given the configuration file is ignored
//! and the flags are turned into a frozen configuration through `figment`,
//! with `Cli` acting as the provider.

use crate::config::{Config, ConfigError};
use crate::coordinator::ConfigSource;
use clap::{Parser, ValueEnum};
use figment::{
    providers::Serialized,
    value::{Dict, Map, Tag, Value},
    Error, Figment, Metadata, Profile, Provider,
};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Relays alert-group webhooks to DingTalk chat robots.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The address to listen on for the web interface.
    #[arg(long = "web.listen-address", value_name = "ADDR", default_value = "0.0.0.0:8060")]
    pub listen_address: SocketAddr,

    /// Path to the configuration file (YAML, or TOML with a `.toml` extension).
    #[arg(long = "config.file", value_name = "FILE", default_value = "config.yml")]
    pub config_file: PathBuf,

    /// Reload when the configuration file or a template file changes.
    #[arg(long = "config.watch")]
    pub watch_config: bool,

    /// Enable reloading via HTTP request.
    #[arg(long = "web.enable-lifecycle")]
    pub enable_lifecycle: bool,

    /// Maximum number of alerts rendered per notification; 0 means unlimited.
    #[arg(long = "web.max-alert-count", value_name = "N", default_value_t = 0)]
    pub max_alert_count: usize,

    /// Only log messages with the given severity or above.
    #[arg(long = "log.level", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Output format of log messages.
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Logfmt)]
    pub log_format: LogFormat,

    /// Legacy: a `name=url` target; may be repeated.
    #[arg(long = "ding.profile", value_name = "NAME=URL", hide = true)]
    pub profiles: Vec<String>,

    /// Legacy: timeout for outbound requests, e.g. `5s`.
    #[arg(long = "ding.timeout", value_name = "DURATION", hide = true)]
    pub ding_timeout: Option<String>,

    /// Legacy: a template file glob.
    #[arg(long = "template.file", value_name = "FILE", hide = true)]
    pub template_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Logfmt,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Logfmt => "logfmt",
            LogFormat::Json => "json",
        })
    }
}

impl Cli {
    /// True if any legacy configuration flag was given.
    pub fn uses_legacy_flags(&self) -> bool {
        !self.profiles.is_empty() || self.ding_timeout.is_some() || self.template_file.is_some()
    }

    /// The configuration described by the legacy flags, if any were given.
    pub fn frozen_config(&self) -> Result<Option<Config>, ConfigError> {
        if !self.uses_legacy_flags() {
            return Ok(None);
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(self.clone())
            .extract()?;
        config.finalize().map(Some)
    }

    /// Where the coordinator loads configuration from.
    pub fn config_source(&self) -> Result<ConfigSource, ConfigError> {
        Ok(match self.frozen_config()? {
            Some(config) => ConfigSource::Frozen(Box::new(config)),
            None => ConfigSource::File(self.config_file.clone()),
        })
    }

    /// Flag values as reported by the status API.
    pub fn flags(&self) -> BTreeMap<String, String> {
        let mut flags = BTreeMap::new();
        flags.insert("web.listen-address".to_string(), self.listen_address.to_string());
        flags.insert("config.file".to_string(), self.config_file.display().to_string());
        flags.insert("config.watch".to_string(), self.watch_config.to_string());
        flags.insert("web.enable-lifecycle".to_string(), self.enable_lifecycle.to_string());
        flags.insert("web.max-alert-count".to_string(), self.max_alert_count.to_string());
        flags.insert("log.level".to_string(), self.log_level.to_string());
        flags.insert("log.format".to_string(), self.log_format.to_string());
        flags
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(timeout) = &self.ding_timeout {
            dict.insert("timeout".into(), Value::from(timeout.clone()));
        }
        if let Some(template) = &self.template_file {
            dict.insert("template".into(), Value::from(template.clone()));
        }

        let mut targets = Dict::new();
        for profile in &self.profiles {
            let (name, url) = profile
                .split_once('=')
                .ok_or_else(|| Error::from(format!("invalid --ding.profile {profile:?}, expected name=url")))?;
            let mut target = Dict::new();
            target.insert("url".into(), Value::from(url.to_string()));
            targets.insert(name.to_string(), Value::Dict(Tag::Default, target));
        }
        if !targets.is_empty() {
            dict.insert("targets".into(), Value::Dict(Tag::Default, targets));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
