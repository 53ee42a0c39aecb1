//! Handbook document loading and the persisted overlay preference.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::source::{BookStore, HANDBOOK_PATH};

const APP_DIR: &str = "lorebook";
const PREFS_FILE: &str = "prefs.json";

/// User preferences. One boolean today; stored as JSON so additions stay
/// backward compatible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prefs {
    /// Set when the user asked not to see the handbook overlay again.
    #[serde(default)]
    pub hide_handbook: bool,
}

impl Prefs {
    /// Preference file under the user config directory, when one exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|base| base.join(APP_DIR).join(PREFS_FILE))
    }

    /// Read once at startup. Any failure (missing file, bad JSON, no config
    /// directory) falls back to defaults; preferences must never block the
    /// page.
    pub fn load_from(path: Option<&Path>) -> Prefs {
        let Some(path) = path else {
            return Prefs::default();
        };
        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(prefs) => prefs,
                Err(err) => {
                    eprintln!("[prefs] path={} parse_failed err={err}", path.display());
                    Prefs::default()
                }
            },
            Err(_) => Prefs::default(),
        }
    }

    /// Persist the preferences, creating the config directory if needed.
    /// Written at most once per overlay dismissal.
    pub fn store_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(path, json)
    }
}

/// Read the handbook document, folding failures into a display message so
/// the overlay can show the error and still be dismissed.
pub fn load_document(store: &BookStore) -> Result<String, String> {
    store
        .read_handbook()
        .map_err(|err| format!("could not load {HANDBOOK_PATH}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let prefs = Prefs::load_from(Some(&dir.path().join("nope.json")));
        assert!(!prefs.hide_handbook);
    }

    #[test]
    fn no_path_falls_back_to_defaults() {
        assert!(!Prefs::load_from(None).hide_handbook);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(!Prefs::load_from(Some(&path)).hide_handbook);
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("deep/nested/prefs.json");
        let prefs = Prefs {
            hide_handbook: true,
        };
        prefs.store_to(&path).unwrap();
        assert!(Prefs::load_from(Some(&path)).hide_handbook);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, r#"{ "hide_handbook": true, "future": 1 }"#).unwrap();
        assert!(Prefs::load_from(Some(&path)).hide_handbook);
    }

    #[test]
    fn load_document_reports_fixed_path_in_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = BookStore::new(dir.path().to_path_buf());
        let err = load_document(&store).unwrap_err();
        assert!(
            err.contains("assets/handbook.md"),
            "error should name the path: {err}"
        );
    }

    #[test]
    fn load_document_reads_the_fixed_path() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/handbook.md"), "# Welcome\n").unwrap();
        let store = BookStore::new(dir.path().to_path_buf());
        assert_eq!(load_document(&store).unwrap(), "# Welcome\n");
    }
}
