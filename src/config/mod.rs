//! Configuration management for the relay
//!
//! This module defines the `Config` struct and its sub-structs. A
//! configuration is loaded with `figment`: built-in defaults, then the
//! configuration file (YAML, or TOML for `.toml` files), then a small set of
//! `DINGRELAY_` environment overrides. Validation runs before a `Config` is
//! handed to anyone, so a partially valid configuration is never observed.

pub mod duration;
pub mod secret;

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::models::MessageType;
pub use secret::{Secret, SecretUrl, SECRET_TOKEN};

/// Title template used when neither the target nor the configuration
/// provides one.
pub const DEFAULT_TITLE_TEMPLATE: &str = "{{> link_title}}";
/// Text template used when neither the target nor the configuration
/// provides one.
pub const DEFAULT_TEXT_TEMPLATE: &str = "{{> link_content}}";
/// Outbound request timeout used when the configuration sets none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] figment::Error),

    #[error("invalid target name: {0:?}")]
    InvalidTargetName(String),

    #[error("invalid target {name:?}: {reason}")]
    InvalidTarget { name: String, reason: String },
}

fn target_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9\-_]*$").expect("target name pattern is valid"))
}

/// Returns true if `name` is usable as a target name.
pub fn is_valid_target_name(name: &str) -> bool {
    target_name_re().is_match(name)
}

/// The syntax of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// TOML for `.toml` files, YAML for everything else.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// The top-level configuration document.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Skip the built-in template set.
    #[serde(default)]
    pub no_builtin_template: bool,
    /// A single template glob, appended to `templates` on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Template file globs, parsed in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<String>,
    /// Message templates for targets that declare none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_message: Option<TargetMessage>,
    /// Timeout applied to every outbound request.
    #[serde(default = "default_timeout", with = "duration")]
    pub timeout: Duration,
    /// Delivery targets by name.
    #[serde(default)]
    pub targets: BTreeMap<String, Target>,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// One delivery destination.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Target {
    /// The robot webhook endpoint.
    pub url: SecretUrl,
    /// Shared signing secret; when set, requests are signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention: Option<TargetMention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<TargetMessage>,
}

impl Target {
    /// A target with only an endpoint.
    pub fn new(url: SecretUrl) -> Self {
        Self {
            url,
            secret: None,
            mention: None,
            message: None,
        }
    }

    /// The signing secret, if one is set and non-empty.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret
            .as_ref()
            .map(Secret::expose)
            .filter(|s| !s.is_empty())
    }
}

/// Who to mention in the outbound message.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TargetMention {
    #[serde(default)]
    pub all: bool,
    #[serde(default, alias = "recipients")]
    pub mobiles: Vec<String>,
}

/// Message templates. Each unset field falls back independently.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TargetMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A message template set with every fallback applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub title: String,
    pub text: String,
}

impl Config {
    /// Loads and validates the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_document(&content, ConfigFormat::from_path(path))
    }

    /// Parses and validates a configuration document.
    pub fn from_document(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        // An empty document means "all defaults".
        if !content.trim().is_empty() {
            figment = match format {
                ConfigFormat::Yaml => figment.merge(Yaml::string(content)),
                ConfigFormat::Toml => figment.merge(Toml::string(content)),
            };
        }
        let config: Config = figment
            // Only scalars can be overridden, e.g. DINGRELAY_TIMEOUT=10s
            .merge(Env::prefixed("DINGRELAY_").only(&["timeout", "no_builtin_template"]))
            .extract()?;
        config.finalize()
    }

    /// Normalizes and validates a configuration built in code or parsed from
    /// a document.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        for name in self.targets.keys() {
            if !is_valid_target_name(name) {
                return Err(ConfigError::InvalidTargetName(name.clone()));
            }
        }
        if let Some(template) = self.template.take() {
            if !template.is_empty() {
                self.templates.push(template);
            }
        }
        Ok(self)
    }

    /// The configuration-level default message, with built-in fallbacks.
    pub fn default_message(&self) -> ResolvedMessage {
        let configured = self.default_message.as_ref();
        ResolvedMessage {
            message_type: configured
                .and_then(|m| m.message_type)
                .unwrap_or_default(),
            title: configured
                .and_then(|m| m.title.clone())
                .unwrap_or_else(|| DEFAULT_TITLE_TEMPLATE.to_string()),
            text: configured
                .and_then(|m| m.text.clone())
                .unwrap_or_else(|| DEFAULT_TEXT_TEMPLATE.to_string()),
        }
    }

    /// The message templates used for `target`: target override, then the
    /// configuration default, then the built-in default, per field.
    pub fn message_for(&self, target: &Target) -> ResolvedMessage {
        let fallback = self.default_message();
        match &target.message {
            None => fallback,
            Some(message) => ResolvedMessage {
                message_type: message.message_type.unwrap_or(fallback.message_type),
                title: message.title.clone().unwrap_or(fallback.title),
                text: message.text.clone().unwrap_or(fallback.text),
            },
        }
    }

    /// Renders the configuration as YAML with every secret redacted.
    pub fn to_redacted_yaml(&self) -> String {
        serde_yml::to_string(self)
            .unwrap_or_else(|e| format!("<error creating config string: {e}>"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            no_builtin_template: false,
            template: None,
            templates: Vec::new(),
            default_message: None,
            timeout: DEFAULT_TIMEOUT,
            targets: BTreeMap::new(),
        }
    }
}
