//! Configuration values that must never be revealed when the configuration
//! is logged or serialized for status output.

use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;
use url::Url;

/// The token written in place of any secret value.
pub const SECRET_TOKEN: &str = "<secret>";

fn secret_param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(secret|token|key|nonce|digest)").expect("secret pattern is valid"))
}

/// Returns true if a query parameter with this name carries a credential.
pub fn is_secret_param(name: &str) -> bool {
    secret_param_re().is_match(name)
}

// =============================================================================
// Secret
// =============================================================================

/// An opaque string that serializes and debug-prints as `<secret>`.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for the code paths that actually need it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SECRET_TOKEN)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(SECRET_TOKEN)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

// =============================================================================
// SecretUrl
// =============================================================================

/// An http(s) endpoint URL whose password and credential-looking query
/// parameters are redacted whenever it is printed or serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretUrl(Url);

impl SecretUrl {
    /// Parses and validates an endpoint URL: the scheme must be http or
    /// https and the host must be present.
    pub fn parse(input: &str) -> Result<Self, String> {
        let url = Url::parse(input).map_err(|e| format!("invalid URL: {e}"))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!("unsupported scheme {:?} for URL", url.scheme()));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err("missing host for URL".to_string());
        }
        Ok(Self(url))
    }

    /// The unredacted URL.
    pub fn expose(&self) -> &Url {
        &self.0
    }

    /// The URL with its password and every credential-looking query value
    /// replaced by `<secret>`, and the query sorted by parameter name. A
    /// secret parameter given several times appears once.
    pub fn redacted(&self) -> String {
        let mut url = self.0.clone();
        if url.password().is_some() {
            // Cannot fail: `parse` only admits http(s) URLs with a host.
            let _ = url.set_password(Some(SECRET_TOKEN));
        }
        if url.query().is_none() {
            return url.to_string();
        }

        let mut pairs: Vec<(String, String)> = self
            .0
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        // Serialized by hand so the token's angle brackets stay readable.
        let mut query: Vec<String> = Vec::with_capacity(pairs.len());
        let mut previous: Option<&str> = None;
        for (k, v) in &pairs {
            let key: String = url::form_urlencoded::byte_serialize(k.as_bytes()).collect();
            if is_secret_param(k) {
                if previous != Some(k.as_str()) {
                    query.push(format!("{key}={SECRET_TOKEN}"));
                }
            } else {
                let value: String = url::form_urlencoded::byte_serialize(v.as_bytes()).collect();
                query.push(format!("{key}={value}"));
            }
            previous = Some(k.as_str());
        }
        url.set_query(None);
        format!("{}?{}", url, query.join("&"))
    }
}

impl fmt::Debug for SecretUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Display for SecretUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl Serialize for SecretUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.redacted())
    }
}

impl<'de> Deserialize<'de> for SecretUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SecretUrl::parse(&raw).map_err(de::Error::custom)
    }
}
