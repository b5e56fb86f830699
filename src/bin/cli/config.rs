//! Configuration file support.
//!
//! ```toml
//! # ~/.config/modstack/config.toml
//! state_dir = "/var/lib/modstack"
//!
//! [installations.quake]
//! game = "quake"
//! root = "/games/quake"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use modstack::InstallationConfig;

use crate::InstallArgs;

/// Errors while loading the config file or resolving an installation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("no installation named '{0}' in the config file")]
    UnknownInstallation(String),

    #[error("missing --{0} (or --install with a configured installation)")]
    Missing(&'static str),
}

/// Contents of `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base directory for installation state; each installation gets a
    /// subdirectory named after it. Defaults to `<root>/.modstack`.
    pub state_dir: Option<PathBuf>,

    /// Named installations.
    pub installations: BTreeMap<String, ConfiguredInstallation>,
}

/// One `[installations.<name>]` table.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfiguredInstallation {
    pub game: String,
    pub root: PathBuf,
    pub state_dir: Option<PathBuf>,
}

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("modstack").join("config.toml"))
}

/// Loads the config from `path`, or from the default location.
///
/// A missing file at the default location yields the default config; an
/// explicitly given file must exist.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(Config::default()),
        },
    };

    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound && !required => {
            return Ok(Config::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    log::debug!("loaded config from {}", path.display());
    toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

impl Config {
    /// Builds the installation config from the command line and the file.
    ///
    /// Flags win over a named installation, which wins over defaults.
    pub fn resolve(&self, args: &InstallArgs) -> Result<InstallationConfig, ConfigError> {
        let named = match &args.install {
            Some(name) => Some((
                name.as_str(),
                self.installations
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownInstallation(name.clone()))?,
            )),
            None => None,
        };

        let game = args
            .game
            .clone()
            .or_else(|| named.map(|(_, i)| i.game.clone()))
            .ok_or(ConfigError::Missing("game"))?;
        let root = args
            .root
            .clone()
            .or_else(|| named.map(|(_, i)| i.root.clone()))
            .ok_or(ConfigError::Missing("root"))?;
        let state_dir = args
            .state_dir
            .clone()
            .or_else(|| named.and_then(|(_, i)| i.state_dir.clone()))
            .or_else(|| {
                let name = named.map_or(game.as_str(), |(name, _)| name);
                self.state_dir.as_ref().map(|base| base.join(name))
            });

        let mut config = InstallationConfig::new(game, root);
        if let Some(dir) = state_dir {
            config = config.state_dir(dir);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(install: Option<&str>, game: Option<&str>, root: Option<&str>) -> InstallArgs {
        InstallArgs {
            install: install.map(String::from),
            game: game.map(String::from),
            root: root.map(PathBuf::from),
            state_dir: None,
        }
    }

    fn config() -> Config {
        toml::from_str(
            r#"
            state_dir = "/state"

            [installations.q1]
            game = "quake"
            root = "/games/quake"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_named_installation() {
        let resolved = config().resolve(&args(Some("q1"), None, None)).unwrap();
        assert_eq!(resolved.game(), "quake");
        assert_eq!(resolved.root(), Path::new("/games/quake"));
        assert_eq!(resolved.effective_state_dir(), Path::new("/state/q1"));
    }

    #[test]
    fn test_flags_override_file() {
        let resolved = config()
            .resolve(&args(Some("q1"), None, Some("/elsewhere")))
            .unwrap();
        assert_eq!(resolved.root(), Path::new("/elsewhere"));
    }

    #[test]
    fn test_missing_values() {
        let err = Config::default()
            .resolve(&args(None, Some("quake"), None))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("root")));
        let err = config().resolve(&args(Some("nope"), None, None)).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownInstallation(_)));
    }

    #[test]
    fn test_default_state_dir_without_base() {
        let resolved = Config::default()
            .resolve(&args(None, Some("quake"), Some("/g")))
            .unwrap();
        assert_eq!(resolved.effective_state_dir(), Path::new("/g/.modstack"));
    }
}
