use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::identity::Identity;

/// configuration for a single mirror
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    /// location of the mirror; the URL scheme selects the push/pull
    /// helper
    pub url: String,

    /// command line arguments passed to the mirror helper tool
    #[serde(rename = "helperFlags", default, skip_serializing_if = "Vec::is_empty")]
    pub helper_flags: Vec<String>,

    /// pull-only mirrors are never pushed to
    #[serde(rename = "readOnly", default, skip_serializing_if = "is_false")]
    pub read_only: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Mirror {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            helper_flags: vec![],
            read_only: false,
        }
    }

    /// the URL scheme, used as the helper qualifier
    pub fn scheme(&self) -> Option<&str> {
        let (scheme, _) = self.url.split_once(':')?;
        if scheme.is_empty() {
            return None;
        }
        Some(scheme)
    }
}

/// configuration for one identity used to sign and/or verify snapshots
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// the identity in its canonical `<namespace>::<contents>` encoding
    pub name: String,

    /// mirrors we pull snapshots for this identity from, and push to
    /// unless marked read-only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<Mirror>,
}

/// settings consumed by the publish orchestration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<IdentityConfig>,

    /// mirrors consulted for identities with no dedicated entry
    #[serde(rename = "additionalMirrors", default, skip_serializing_if = "Vec::is_empty")]
    pub additional_mirrors: Vec<Mirror>,
}

impl Settings {
    /// load settings from a config file; a missing file is an empty config
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_path(path),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    /// save settings, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        let contents = serde_json::to_string(self)?;
        std::fs::write(path, contents).with_path(path)?;
        Ok(())
    }

    /// the default config file location: `$XDG_CONFIG_HOME/rvcs/config.json`
    /// with a `~/.config` fallback
    pub fn default_path() -> Option<PathBuf> {
        let config_dir = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
        };
        Some(config_dir.join("rvcs").join("config.json"))
    }

    /// every mirror configured for an identity, including the shared
    /// additional mirrors
    pub fn mirrors_for(&self, id: &Identity) -> Vec<&Mirror> {
        let name = id.to_string();
        let mut mirrors = Vec::new();
        for identity_config in &self.identities {
            if identity_config.name == name {
                mirrors.extend(identity_config.mirrors.iter());
            }
        }
        mirrors.extend(self.additional_mirrors.iter());
        mirrors
    }

    /// add or replace a mirror for the named identity
    pub fn add_mirror_for_identity(&mut self, id_name: &str, mirror: Mirror) {
        for identity_config in &mut self.identities {
            if identity_config.name == id_name {
                identity_config.mirrors.retain(|m| m.url != mirror.url);
                identity_config.mirrors.push(mirror);
                return;
            }
        }
        self.identities.push(IdentityConfig {
            name: id_name.to_string(),
            mirrors: vec![mirror],
        });
    }

    /// add or replace a shared additional mirror
    pub fn add_additional_mirror(&mut self, mirror: Mirror) {
        self.additional_mirrors.retain(|m| m.url != mirror.url);
        self.additional_mirrors.push(mirror);
    }

    /// remove a mirror for the named identity
    pub fn remove_mirror_for_identity(&mut self, id_name: &str, url: &str) {
        for identity_config in &mut self.identities {
            if identity_config.name == id_name {
                identity_config.mirrors.retain(|m| m.url != url);
            }
        }
    }

    /// remove a shared additional mirror
    pub fn remove_additional_mirror(&mut self, url: &str) {
        self.additional_mirrors.retain(|m| m.url != url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_settings() -> Settings {
        Settings {
            identities: vec![IdentityConfig {
                name: "ed25519::alice@example.com".to_string(),
                mirrors: vec![
                    Mirror {
                        url: "file:///mnt/mirror".to_string(),
                        helper_flags: vec!["--fast".to_string()],
                        read_only: false,
                    },
                    Mirror {
                        url: "https://mirror.example.com/alice".to_string(),
                        helper_flags: vec![],
                        read_only: true,
                    },
                ],
            }],
            additional_mirrors: vec![Mirror::new("file:///srv/shared")],
        }
    }

    #[test]
    fn test_json_roundtrip_with_original_field_names() {
        let settings = sample_settings();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"identities\""));
        assert!(json.contains("\"additionalMirrors\""));
        assert!(json.contains("\"helperFlags\""));
        assert!(json.contains("\"readOnly\""));

        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, parsed);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("missing.json")).unwrap();
        assert!(settings.identities.is_empty());
        assert!(settings.additional_mirrors.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let settings = sample_settings();
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_mirror_scheme() {
        assert_eq!(Mirror::new("file:///mnt/mirror").scheme(), Some("file"));
        assert_eq!(
            Mirror::new("https://example.com/path").scheme(),
            Some("https")
        );
        assert_eq!(Mirror::new("no-scheme-here").scheme(), None);
    }

    #[test]
    fn test_mirrors_for_includes_additional() {
        let settings = sample_settings();
        let id = Identity::new("ed25519", "alice@example.com");
        let mirrors = settings.mirrors_for(&id);
        assert_eq!(mirrors.len(), 3);

        let other = Identity::new("ed25519", "bob@example.com");
        let mirrors = settings.mirrors_for(&other);
        assert_eq!(mirrors.len(), 1);
        assert_eq!(mirrors[0].url, "file:///srv/shared");
    }

    #[test]
    fn test_add_mirror_replaces_same_url() {
        let mut settings = sample_settings();
        let replacement = Mirror {
            url: "file:///mnt/mirror".to_string(),
            helper_flags: vec!["--slow".to_string()],
            read_only: true,
        };
        settings.add_mirror_for_identity("ed25519::alice@example.com", replacement.clone());
        let mirrors = &settings.identities[0].mirrors;
        assert_eq!(mirrors.len(), 2);
        assert!(mirrors.contains(&replacement));
    }

    #[test]
    fn test_remove_mirror() {
        let mut settings = sample_settings();
        settings.remove_mirror_for_identity("ed25519::alice@example.com", "file:///mnt/mirror");
        assert_eq!(settings.identities[0].mirrors.len(), 1);

        settings.remove_additional_mirror("file:///srv/shared");
        assert!(settings.additional_mirrors.is_empty());
    }
}
