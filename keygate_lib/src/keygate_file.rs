use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::data_interface::DataInterfaceType;

pub const DEFAULT_URL: &str = "sqlite:///data/tokens.db";
pub const DEFAULT_TOKEN_PREFIX: &str = "OLLY";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KeygateFile {
    pub url: String,
    pub data_interface: DataInterfaceType,
    #[serde(default = "default_token_prefix")]
    pub token_prefix: String,
    #[serde(default)]
    pub require_admin_for_generate: bool,
}

fn default_token_prefix() -> String {
    DEFAULT_TOKEN_PREFIX.to_owned()
}

impl Default for KeygateFile {
    fn default() -> Self {
        KeygateFile {
            url: DEFAULT_URL.to_owned(),
            data_interface: DataInterfaceType::Sqlite,
            token_prefix: default_token_prefix(),
            require_admin_for_generate: false,
        }
    }
}

impl KeygateFile {
    pub fn load_file(path: PathBuf) -> anyhow::Result<KeygateFile> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_file(&self, path: PathBuf) -> anyhow::Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Filesystem path behind a `sqlite:` url, if it names a file.
    pub fn database_path(&self) -> Option<PathBuf> {
        let rest = self.url.strip_prefix("sqlite:")?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let rest = rest.split('?').next().unwrap_or_default();
        if rest.is_empty() || rest == ":memory:" {
            return None;
        }
        Some(PathBuf::from(rest))
    }

    pub fn ensure_database_dir(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.database_path().as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> KeygateFile {
        KeygateFile {
            url: url.to_owned(),
            ..KeygateFile::default()
        }
    }

    #[test]
    fn database_path_from_url() {
        assert_eq!(
            KeygateFile::default().database_path(),
            Some(PathBuf::from("/data/tokens.db"))
        );
        assert_eq!(
            with_url("sqlite:tokens.db?mode=rwc").database_path(),
            Some(PathBuf::from("tokens.db"))
        );
        assert_eq!(with_url("sqlite::memory:").database_path(), None);
        assert_eq!(with_url("postgres://localhost/db").database_path(), None);
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let file: KeygateFile =
            toml::from_str("url = \"sqlite::memory:\"\ndata_interface = \"Sqlite\"\n").unwrap();
        assert_eq!(file.token_prefix, "OLLY");
        assert!(!file.require_admin_for_generate);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keygate.toml");
        let file = KeygateFile {
            token_prefix: "ACME".to_owned(),
            require_admin_for_generate: true,
            ..KeygateFile::default()
        };
        file.save_file(path.clone()).unwrap();
        assert_eq!(KeygateFile::load_file(path).unwrap(), file);
    }

    #[test]
    fn creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("tokens.db");
        with_url(&format!("sqlite://{}", db.display()))
            .ensure_database_dir()
            .unwrap();
        assert!(dir.path().join("nested").is_dir());
    }
}
