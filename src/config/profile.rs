use super::error::{ConfigError, ConfigResult};
use crate::constants::PROFILE_KEYS;
use crate::transfer::TransferMode;
use ini::Ini;
use log::debug;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Settings of one named profile in the configuration file.
///
/// A profile is loaded once per invocation and never modified afterwards,
/// except for the password which `-P` may replace before the run starts.
#[derive(Clone, PartialEq, Eq)]
pub struct Profile {
    /// Section name the profile was loaded from
    pub name: String,
    /// Directory receiving exported tablespaces and the run state
    pub workdir: PathBuf,
    /// Local server socket
    pub db_socket: PathBuf,
    pub db_user: String,
    pub db_password: String,
    /// Hard-link tablespace files instead of copying them
    pub use_hardlink: bool,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("workdir", &self.workdir)
            .field("db_socket", &self.db_socket)
            .field("db_user", &self.db_user)
            .field(
                "db_password",
                &if self.db_password.is_empty() { "" } else { "***" },
            )
            .field("use_hardlink", &self.use_hardlink)
            .finish()
    }
}

impl Profile {
    /// Transfer strategy selected by `use_hardlink`
    pub fn transfer_mode(&self) -> TransferMode {
        if self.use_hardlink {
            TransferMode::Hardlink
        } else {
            TransferMode::Copy
        }
    }

    /// Replace the configured password, e.g. with one typed interactively
    pub fn with_password<S: Into<String>>(mut self, password: S) -> Self {
        self.db_password = password.into();
        self
    }

    /// Check that the paths named by the profile exist on this host
    pub fn validate_paths(&self) -> ConfigResult<()> {
        if !self.workdir.is_dir() {
            return Err(ConfigError::validation(format!(
                "workdir {} does not exist or is not a directory",
                self.workdir.display()
            )));
        }
        if !self.db_socket.exists() {
            return Err(ConfigError::validation(format!(
                "database socket {} does not exist",
                self.db_socket.display()
            )));
        }
        Ok(())
    }
}

/// Load and fully validate `profile` from the INI file at `path`
pub fn load_profile(path: &Path, profile: &str) -> ConfigResult<Profile> {
    if !path.is_file() {
        return Err(ConfigError::not_found(path.display().to_string()));
    }
    let content = fs::read_to_string(path)?;
    let parsed = parse_profile(&content, profile, &path.display().to_string())?;
    parsed.validate_paths()?;
    debug!("Loaded profile {:?}", parsed);
    Ok(parsed)
}

/// Parse `profile` out of INI text without touching the filesystem.
///
/// `origin` only appears in error messages.
pub fn parse_profile(content: &str, profile: &str, origin: &str) -> ConfigResult<Profile> {
    let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let section = ini
        .section(Some(profile))
        .ok_or_else(|| ConfigError::ProfileNotFound {
            profile: profile.to_string(),
            path: origin.to_string(),
        })?;

    for (key, _) in section.iter() {
        if !PROFILE_KEYS.contains(&key) {
            return Err(ConfigError::UnknownKey {
                profile: profile.to_string(),
                key: key.to_string(),
            });
        }
    }

    let required = |key: &str| -> ConfigResult<String> {
        match section.get(key).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(ConfigError::MissingKey {
                profile: profile.to_string(),
                key: key.to_string(),
            }),
        }
    };
    let optional = |key: &str| section.get(key).map(|v| v.trim().to_string()).unwrap_or_default();

    let workdir = PathBuf::from(required("workdir")?);
    if !workdir.is_absolute() {
        return Err(ConfigError::validation(format!(
            "workdir must be an absolute path, got {}",
            workdir.display()
        )));
    }
    let db_socket = PathBuf::from(required("db_socket")?);
    let use_hardlink = match section.get("use_hardlink") {
        Some(raw) => parse_bool(raw).ok_or_else(|| {
            ConfigError::validation(format!(
                "use_hardlink must be a boolean (yes/no), got '{}'",
                raw.trim()
            ))
        })?,
        None => false,
    };

    Ok(Profile {
        name: profile.to_string(),
        workdir,
        db_socket,
        db_user: optional("db_user"),
        db_password: optional("db_password"),
        use_hardlink,
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[default]
workdir = /var/tmp/shrink
db_socket = /var/run/mysqld/mysqld.sock
db_user = root

[fast]
workdir = /srv/mysql-work
db_socket = /var/run/mysqld/mysqld.sock
db_password = secret
use_hardlink = yes
";

    #[test]
    fn test_defaults_for_optional_keys() {
        let profile = parse_profile(SAMPLE, "default", "sample.ini").unwrap();
        assert_eq!(profile.workdir, PathBuf::from("/var/tmp/shrink"));
        assert_eq!(profile.db_user, "root");
        assert_eq!(profile.db_password, "");
        assert!(!profile.use_hardlink);
        assert_eq!(profile.transfer_mode(), TransferMode::Copy);
    }

    #[test]
    fn test_hardlink_profile() {
        let profile = parse_profile(SAMPLE, "fast", "sample.ini").unwrap();
        assert!(profile.use_hardlink);
        assert_eq!(profile.transfer_mode(), TransferMode::Hardlink);
        assert_eq!(profile.db_user, "");
        assert!(!format!("{:?}", profile).contains("secret"));
    }

    #[test]
    fn test_missing_profile() {
        let err = parse_profile(SAMPLE, "staging", "sample.ini").unwrap_err();
        assert!(matches!(err, ConfigError::ProfileNotFound { .. }));
    }

    #[test]
    fn test_missing_mandatory_key() {
        let err = parse_profile("[default]\nworkdir = /tmp/x\n", "default", "x.ini").unwrap_err();
        match err {
            ConfigError::MissingKey { key, .. } => assert_eq!(key, "db_socket"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_relative_workdir_rejected() {
        let err = parse_profile(
            "[default]\nworkdir = work\ndb_socket = /tmp/sock\n",
            "default",
            "x.ini",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_profile(
            "[default]\nworkdir = /w\ndb_socket = /s\ndb_host = localhost\n",
            "default",
            "x.ini",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { .. }));
    }

    #[test]
    fn test_bad_boolean_rejected() {
        let err = parse_profile(
            "[default]\nworkdir = /w\ndb_socket = /s\nuse_hardlink = maybe\n",
            "default",
            "x.ini",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_validate_paths() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("mysqld.sock");
        fs::write(&socket, b"").unwrap();
        let content = format!(
            "[default]\nworkdir = {}\ndb_socket = {}\n",
            dir.path().display(),
            socket.display()
        );
        let profile = parse_profile(&content, "default", "x.ini").unwrap();
        profile.validate_paths().unwrap();

        let missing = Profile {
            db_socket: dir.path().join("nope.sock"),
            ..profile
        };
        assert!(missing.validate_paths().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_profile(&dir.path().join("absent.ini"), "default").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
