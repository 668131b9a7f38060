use std::collections::HashSet;

use crate::error::{MirrorError, Result};
use crate::profile::CONFLICT_SUFFIX;
use serde::{Deserialize, Serialize};

const MIN_NOTIFIER_DELAY_MS: u64 = 1;
const MAX_NOTIFIER_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifierConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl NotifierConfig {
    pub fn get_delay_ms(&self) -> u64 {
        self.delay_ms.unwrap_or_else(super::default_notifier_delay_ms)
    }
}

/// One remote system the cache can mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileConfig {
    pub name: String,
    /// Base directory served by the directory-backed store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

impl Config {
    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for profile in &config.profiles {
        if profile.name.trim().is_empty() {
            return Err(MirrorError::Config(
                "Profile names must not be empty".to_string(),
            ));
        }
        if profile.name.contains('/') || profile.name.contains(CONFLICT_SUFFIX) {
            return Err(MirrorError::Config(format!(
                "Invalid profile name '{}': must not contain '/' or '{}'",
                profile.name, CONFLICT_SUFFIX
            )));
        }
        if !seen.insert(profile.name.as_str()) {
            return Err(MirrorError::Config(format!(
                "Duplicate profile name '{}'",
                profile.name
            )));
        }
    }

    let delay_ms = config.notifier.get_delay_ms();
    if !(MIN_NOTIFIER_DELAY_MS..=MAX_NOTIFIER_DELAY_MS).contains(&delay_ms) {
        tracing::warn!(
            "notifier.delay_ms ({}) is outside the recommended range {}..={}ms",
            delay_ms,
            MIN_NOTIFIER_DELAY_MS,
            MAX_NOTIFIER_DELAY_MS
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> ProfileConfig {
        ProfileConfig {
            name: name.to_string(),
            root: None,
            encoding: None,
            response_timeout_secs: None,
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.notifier.get_delay_ms(), 5);
        assert!(config.profiles.is_empty());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_parse_profiles() {
        let config: Config = toml::from_str(
            r#"
            [notifier]
            delay_ms = 20

            [[profiles]]
            name = "lpar1"
            root = "/srv/lpar1"
            encoding = "IBM-1047"
            "#,
        )
        .unwrap();

        assert_eq!(config.notifier.get_delay_ms(), 20);
        let lpar1 = config.profile("lpar1").unwrap();
        assert_eq!(lpar1.root.as_deref(), Some("/srv/lpar1"));
        assert_eq!(lpar1.encoding.as_deref(), Some("IBM-1047"));
        assert!(lpar1.response_timeout_secs.is_none());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = Config {
            profiles: vec![profile("a"), profile("a")],
            ..Default::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(MirrorError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_reserved_names() {
        for name in ["", "a/b", "a$conflicts"] {
            let config = Config {
                profiles: vec![profile(name)],
                ..Default::default()
            };
            assert!(
                validate_config(&config).is_err(),
                "profile name {:?} should be rejected",
                name
            );
        }
    }
}
