use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{MirrorError, Result};

/// Suffix appended to a profile name to form its conflict namespace.
pub const CONFLICT_SUFFIX: &str = "$conflicts";

/// A named connection to one remote system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub encoding: Option<String>,
    pub response_timeout: Option<Duration>,
}

impl Profile {
    pub fn new(name: &str) -> Self {
        Profile {
            name: name.to_string(),
            encoding: None,
            response_timeout: None,
        }
    }
}

pub type ProfileHandle = Arc<Profile>;

/// Profiles known to one provider instance, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct ProfileCache {
    profiles: HashMap<String, ProfileHandle>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        let mut cache = Self::new();
        for profile in &config.profiles {
            cache.insert(Profile {
                name: profile.name.clone(),
                encoding: profile.encoding.clone(),
                response_timeout: profile.response_timeout_secs.map(Duration::from_secs),
            });
        }
        cache
    }

    pub fn insert(&mut self, profile: Profile) -> ProfileHandle {
        let handle = Arc::new(profile);
        self.profiles.insert(handle.name.clone(), handle.clone());
        handle
    }

    pub fn get(&self, name: &str) -> Option<ProfileHandle> {
        self.profiles.get(name).cloned()
    }

    /// Resolve a profile by name, failing with `NotFound` for unknown names.
    pub fn require(&self, name: &str) -> Result<ProfileHandle> {
        self.get(name)
            .ok_or_else(|| MirrorError::NotFound(format!("Profile does not exist: {}", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }
}

/// What a virtual path says about its profile and remote location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub profile_name: String,
    /// Remote path with a leading slash; `/` for the profile directory itself.
    pub remote_path: String,
    /// True when the path names the profile directory.
    pub is_root: bool,
    /// True when the path lives in the profile's conflict namespace.
    pub is_conflict: bool,
}

/// Split `/{profile}/{remote path}` into its parts. Returns `None` for `/`.
pub fn path_info(path: &str) -> Option<PathInfo> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let (first, rest) = match trimmed.find('/') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
        None => (trimmed, ""),
    };

    let (profile_name, is_conflict) = match first.strip_suffix(CONFLICT_SUFFIX) {
        Some(name) => (name, true),
        None => (first, false),
    };

    let rest = rest.trim_end_matches('/');
    Some(PathInfo {
        profile_name: profile_name.to_string(),
        remote_path: if rest.is_empty() {
            "/".to_string()
        } else {
            rest.to_string()
        },
        is_root: rest.is_empty(),
        is_conflict,
    })
}

/// Virtual path of the conflict namespace for a profile.
pub fn conflict_root(profile_name: &str) -> String {
    format!("/{}{}", profile_name, CONFLICT_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/lpar1/u/user/a.txt", "lpar1", "/u/user/a.txt", false, false)]
    #[case("/lpar1", "lpar1", "/", true, false)]
    #[case("/lpar1/", "lpar1", "/", true, false)]
    #[case("/lpar1$conflicts/u/a.txt", "lpar1", "/u/a.txt", false, true)]
    fn test_path_info(
        #[case] path: &str,
        #[case] profile: &str,
        #[case] remote: &str,
        #[case] is_root: bool,
        #[case] is_conflict: bool,
    ) {
        let info = path_info(path).unwrap();
        assert_eq!(info.profile_name, profile);
        assert_eq!(info.remote_path, remote);
        assert_eq!(info.is_root, is_root);
        assert_eq!(info.is_conflict, is_conflict);
    }

    #[test]
    fn test_path_info_for_root_is_none() {
        assert!(path_info("/").is_none());
        assert!(path_info("").is_none());
    }

    #[test]
    fn test_require_unknown_profile() {
        let mut cache = ProfileCache::new();
        cache.insert(Profile::new("lpar1"));

        assert!(cache.require("lpar1").is_ok());
        assert!(matches!(
            cache.require("missing"),
            Err(MirrorError::NotFound(_))
        ));
        assert_eq!(cache.names(), vec!["lpar1".to_string()]);
    }

    #[test]
    fn test_conflict_root() {
        assert_eq!(conflict_root("lpar1"), "/lpar1$conflicts");
        let info = path_info(&conflict_root("lpar1")).unwrap();
        assert!(info.is_conflict);
        assert!(info.is_root);
    }
}
