//! Client options, their sources, and resolution

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use crate::error::{Error, Result};

/// Separator introducing `team/suite/version` segments inside `api_url`
const URL_SEGMENT_MARKER: &str = "/@/";

pub const ENV_API_KEY: &str = "TALLY_API_KEY";
pub const ENV_API_URL: &str = "TALLY_API_URL";
pub const ENV_TEAM: &str = "TALLY_TEAM";
pub const ENV_SUITE: &str = "TALLY_SUITE";
pub const ENV_VERSION: &str = "TALLY_VERSION";
pub const ENV_OFFLINE: &str = "TALLY_OFFLINE";
pub const ENV_CONFIG_FILE: &str = "TALLY_CONFIG_FILE";

/// A partial set of client options.
///
/// Every field is optional so that layers (config file, environment,
/// explicit values) can be merged; [`ClientOptions::resolve`] checks that
/// the required ones ended up set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    #[serde(alias = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(alias = "apiUrl", skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection: Option<bool>,

    #[serde(alias = "submitAsync", skip_serializing_if = "Option::is_none")]
    pub submit_async: Option<bool>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn with_suite(mut self, suite: impl Into<String>) -> Self {
        self.suite = Some(suite.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = Some(offline);
        self
    }

    pub fn with_concurrency(mut self, concurrency: bool) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_reflection(mut self, reflection: bool) -> Self {
        self.reflection = Some(reflection);
        self
    }

    pub fn with_submit_async(mut self, submit_async: bool) -> Self {
        self.submit_async = Some(submit_async);
        self
    }

    /// Options from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Options from `TALLY_*` variables in `vars`; empty values are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut options = Self::default();
        for (key, value) in vars {
            let value: String = value.into();
            if value.trim().is_empty() {
                continue;
            }
            match key.as_ref() {
                ENV_API_KEY => options.api_key = Some(value),
                ENV_API_URL => options.api_url = Some(value),
                ENV_TEAM => options.team = Some(value),
                ENV_SUITE => options.suite = Some(value),
                ENV_VERSION => options.version = Some(value),
                ENV_OFFLINE => options.offline = Some(parse_flag(ENV_OFFLINE, &value)?),
                _ => {}
            }
        }
        Ok(options)
    }

    /// Options from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(format!("TOML parse error: {e}")))
    }

    /// Options from the config file (explicit path, else `TALLY_CONFIG_FILE`)
    /// overlaid by the environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let path = config_file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(ENV_CONFIG_FILE).map(PathBuf::from));

        let mut layers = Vec::with_capacity(2);
        if let Some(path) = path {
            layers.push(Self::from_file(&path)?);
        }
        layers.push(Self::from_env()?);
        Self::layered(&layers)
    }

    /// Merge layers in order; later layers win and unset fields never
    /// clear earlier ones. Each layer's `api_url` is normalized first so
    /// URL conflicts are reported against the layer that caused them.
    pub fn layered(layers: &[ClientOptions]) -> Result<Self> {
        let mut values = Vec::with_capacity(layers.len());
        for layer in layers {
            values.push(serde_json::to_value(layer.clone().normalize()?)?);
        }
        Ok(serde_json::from_value(merge_layers(values))?)
    }

    /// Move `team/suite/version` segments embedded after `/@/` in
    /// `api_url` into their fields and strip them (and any trailing slash)
    /// from the URL.
    pub fn normalize(mut self) -> Result<Self> {
        let Some(url) = self.api_url.take() else {
            return Ok(self);
        };

        let (base, embedded) = match url.split_once(URL_SEGMENT_MARKER) {
            Some((base, rest)) => (base, rest),
            None => (url.as_str(), ""),
        };

        let segments: Vec<&str> = embedded.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() > 3 {
            return Err(Error::Configuration(format!(
                "api_url embeds more than team/suite/version: {url}"
            )));
        }

        let fields = [
            ("team", &mut self.team),
            ("suite", &mut self.suite),
            ("version", &mut self.version),
        ];
        for ((name, slot), segment) in fields.into_iter().zip(segments) {
            match slot.as_deref() {
                Some(explicit) if explicit != segment => {
                    return Err(Error::Configuration(format!(
                        "conflicting values for `{name}`: `{explicit}` given, `{segment}` in api_url"
                    )));
                }
                Some(_) => {}
                None => *slot = Some(segment.to_string()),
            }
        }

        self.api_url = Some(base.trim_end_matches('/').to_string());
        Ok(self)
    }

    /// Apply built-in defaults and check that the required fields are set.
    pub fn resolve(&self) -> Result<ResolvedOptions> {
        let merged = merge_layers(vec![
            BuiltinDefaults::default().to_value(),
            serde_json::to_value(self.clone().normalize()?)?,
        ]);
        let options: ClientOptions = serde_json::from_value(merged)?;

        let required = |name: &str, value: Option<String>| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Configuration(format!("missing required option `{name}`")))
        };

        Ok(ResolvedOptions {
            team: required("team", options.team)?,
            suite: required("suite", options.suite)?,
            version: required("version", options.version)?,
            api_key: options.api_key,
            api_url: options.api_url.filter(|u| !u.is_empty()),
            offline: options.offline.unwrap_or_default(),
            concurrency: options.concurrency.unwrap_or(true),
            reflection: options.reflection.unwrap_or(true),
            submit_async: options.submit_async.unwrap_or_default(),
        })
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Configuration(format!(
            "{name} must be a boolean, got `{other}`"
        ))),
    }
}

/// Fully validated options held by a configured client.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub team: String,
    pub suite: String,
    pub version: String,
    pub offline: bool,
    pub concurrency: bool,
    pub reflection: bool,
    pub submit_async: bool,
}

impl ResolvedOptions {
    /// Whether server operations are available.
    pub fn is_online(&self) -> bool {
        !self.offline && self.api_key.is_some() && self.api_url.is_some()
    }

    /// Back to a layer, for re-configuring on top of these values.
    pub fn to_options(&self) -> ClientOptions {
        ClientOptions {
            api_key: self.api_key.clone(),
            api_url: self.api_url.clone(),
            team: Some(self.team.clone()),
            suite: Some(self.suite.clone()),
            version: Some(self.version.clone()),
            offline: Some(self.offline),
            concurrency: Some(self.concurrency),
            reflection: Some(self.reflection),
            submit_async: Some(self.submit_async),
        }
    }
}

impl fmt::Debug for ResolvedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_url", &self.api_url)
            .field("team", &self.team)
            .field("suite", &self.suite)
            .field("version", &self.version)
            .field("offline", &self.offline)
            .field("concurrency", &self.concurrency)
            .field("reflection", &self.reflection)
            .field("submit_async", &self.submit_async)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn base() -> ClientOptions {
        ClientOptions::new()
            .with_team("acme")
            .with_suite("students")
            .with_version("v1")
    }

    #[test]
    fn test_api_url_segments() {
        let options = ClientOptions::new()
            .with_api_url("http://host/@/teamA/suiteB/v1")
            .normalize()
            .unwrap();
        assert_eq!(options.team.as_deref(), Some("teamA"));
        assert_eq!(options.suite.as_deref(), Some("suiteB"));
        assert_eq!(options.version.as_deref(), Some("v1"));
        assert_eq!(options.api_url.as_deref(), Some("http://host"));
    }

    #[test]
    fn test_api_url_partial_segments() {
        let options = ClientOptions::new()
            .with_api_url("https://host/api/@/teamA/")
            .with_suite("s")
            .normalize()
            .unwrap();
        assert_eq!(options.team.as_deref(), Some("teamA"));
        assert_eq!(options.suite.as_deref(), Some("s"));
        assert_eq!(options.version, None);
        assert_eq!(options.api_url.as_deref(), Some("https://host/api"));
    }

    #[test]
    fn test_api_url_trailing_slash() {
        let options = ClientOptions::new()
            .with_api_url("http://host/")
            .normalize()
            .unwrap();
        assert_eq!(options.api_url.as_deref(), Some("http://host"));
    }

    #[test]
    fn test_api_url_conflict_names_field() {
        let err = ClientOptions::new()
            .with_suite("X")
            .with_api_url("http://host/@/teamA/Y/v1")
            .normalize()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("`suite`")));
    }

    #[test]
    fn test_api_url_matching_explicit_value() {
        let options = ClientOptions::new()
            .with_team("teamA")
            .with_api_url("http://host/@/teamA")
            .normalize()
            .unwrap();
        assert_eq!(options.team.as_deref(), Some("teamA"));
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let resolved = base().resolve().unwrap();
        assert_eq!(resolved.team, "acme");
        assert!(!resolved.offline);
        assert!(resolved.concurrency);
        assert!(resolved.reflection);
        assert!(!resolved.submit_async);
        assert!(!resolved.is_online());
    }

    #[test]
    fn test_resolve_requires_identity() {
        for options in [
            ClientOptions::new().with_suite("s").with_version("v"),
            ClientOptions::new().with_team("t").with_version("v"),
            ClientOptions::new().with_team("t").with_suite("s"),
        ] {
            assert!(matches!(options.resolve(), Err(Error::Configuration(_))));
        }
    }

    #[test]
    fn test_online_needs_key_url_and_not_offline() {
        let online = base().with_api_key("k").with_api_url("http://host");
        assert!(online.resolve().unwrap().is_online());
        assert!(!online.clone().with_offline(true).resolve().unwrap().is_online());
        assert!(!base().with_api_key("k").resolve().unwrap().is_online());
    }

    #[test]
    fn test_layered_last_wins() {
        let file = base().with_api_url("http://file");
        let env = ClientOptions::new().with_suite("nightly");
        let explicit = ClientOptions::new().with_version("v9");

        let merged = ClientOptions::layered(&[file, env, explicit]).unwrap();
        assert_eq!(merged.team.as_deref(), Some("acme"));
        assert_eq!(merged.suite.as_deref(), Some("nightly"));
        assert_eq!(merged.version.as_deref(), Some("v9"));
        assert_eq!(merged.api_url.as_deref(), Some("http://file"));
    }

    #[test]
    fn test_layered_url_overrides_lower_layer() {
        let lower = base();
        let upper = ClientOptions::new().with_api_url("http://host/@/other/suite2");
        let merged = ClientOptions::layered(&[lower, upper]).unwrap();
        assert_eq!(merged.team.as_deref(), Some("other"));
        assert_eq!(merged.suite.as_deref(), Some("suite2"));
        assert_eq!(merged.version.as_deref(), Some("v1"));
    }

    #[test]
    fn test_from_vars() {
        let vars = [
            ("TALLY_API_KEY", "secret"),
            ("TALLY_TEAM", "acme"),
            ("TALLY_OFFLINE", "yes"),
            ("TALLY_SUITE", ""),
            ("PATH", "/usr/bin"),
        ];
        let options = ClientOptions::from_vars(vars).unwrap();
        assert_eq!(options.api_key.as_deref(), Some("secret"));
        assert_eq!(options.team.as_deref(), Some("acme"));
        assert_eq!(options.offline, Some(true));
        assert_eq!(options.suite, None);
    }

    #[test]
    fn test_from_vars_rejects_bad_flag() {
        let err = ClientOptions::from_vars([("TALLY_OFFLINE", "maybe")]).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("TALLY_OFFLINE")));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "apiUrl = \"http://host/@/acme\"\nsuite = \"students\"\nconcurrency = false"
        )
        .unwrap();

        let options = ClientOptions::from_file(file.path()).unwrap();
        assert_eq!(options.api_url.as_deref(), Some("http://host/@/acme"));
        assert_eq!(options.suite.as_deref(), Some("students"));
        assert_eq!(options.concurrency, Some(false));
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        assert!(ClientOptions::from_toml("tema = \"typo\"").is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let resolved = base().with_api_key("hunter2").resolve().unwrap();
        let rendered = format!("{resolved:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_to_options_round_trip() {
        let resolved = base().with_api_key("k").resolve().unwrap();
        assert_eq!(resolved.to_options().resolve().unwrap(), resolved);
    }
}
