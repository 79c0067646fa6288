//! XDG-compliant path resolution for careplan.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(careplan::paths::no_home),
        help("Set the HOME environment variable or pass --config and --data-dir explicitly.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(careplan::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG directories for careplan.
#[derive(Debug, Clone)]
pub struct CarePaths {
    /// `$XDG_CONFIG_HOME/careplan/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/careplan/`
    pub data_dir: PathBuf,
}

impl CarePaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("careplan");

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join("careplan");

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Create the base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Path to the config file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_lives_in_config_dir() {
        let paths = CarePaths {
            config_dir: PathBuf::from("/tmp/cfg/careplan"),
            data_dir: PathBuf::from("/tmp/data/careplan"),
        };
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/tmp/cfg/careplan/config.toml")
        );
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = CarePaths {
            config_dir: tmp.path().join("config"),
            data_dir: tmp.path().join("data"),
        };
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.data_dir.is_dir());
    }
}
