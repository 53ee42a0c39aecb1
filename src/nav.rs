//! Navigation manifest and key resolution.
//!
//! A book directory carries a `toc.json` manifest describing the navigation
//! menu: the book title, grouped section entries, and the cross-reference
//! alias table consulted by [`Manifest::resolve_key`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

/// Always-present view: the page header. Never fetched.
pub const HOME: &str = "home";
/// Always-present view: the handbook document (inline and overlay).
pub const HANDBOOK: &str = "handbook";

const MANIFEST_FILE: &str = "toc.json";

fn default_xref_prefix() -> String {
    "ref-".to_string()
}

/// Parsed `toc.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Book title, shown in the page header and the home view.
    pub title: String,
    /// Short description under the title.
    #[serde(default)]
    pub blurb: String,
    /// Grouped navigation entries, in menu order.
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Cross-reference alias table: navigation target -> canonical content key.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Prefix marking a target as a cross-reference to the key after it.
    #[serde(default = "default_xref_prefix")]
    pub xref_prefix: String,
}

/// One collapsible group of navigation entries.
#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub label: String,
    #[serde(default)]
    pub sections: Vec<SectionEntry>,
}

/// One navigable section: `id` is the navigation target, `label` the menu text.
#[derive(Debug, Clone, Deserialize)]
pub struct SectionEntry {
    pub id: String,
    pub label: String,
}

impl Manifest {
    /// Read and parse `toc.json` from the book directory.
    pub fn load(book_root: &Path) -> io::Result<Manifest> {
        let path = book_root.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path)?;
        let manifest: Manifest = serde_json::from_str(&raw).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: {}", path.display(), err),
            )
        })?;
        eprintln!(
            "[toc] title={:?} groups={} sections={}",
            manifest.title,
            manifest.groups.len(),
            manifest.section_count()
        );
        Ok(manifest)
    }

    pub fn section_count(&self) -> usize {
        self.groups.iter().map(|g| g.sections.len()).sum()
    }

    /// Menu label for a target, if the manifest lists it.
    pub fn label_for(&self, target: &str) -> Option<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.sections.iter())
            .find(|s| s.id == target)
            .map(|s| s.label.as_str())
    }

    /// Map a navigation target to the content key backing it.
    ///
    /// The alias table wins, then the cross-reference prefix is stripped,
    /// otherwise the key equals the target. Pure and total; callers consult
    /// it exactly once per load so downstream code only ever sees keys.
    pub fn resolve_key(&self, target: &str) -> String {
        if let Some(key) = self.aliases.get(target) {
            return key.clone();
        }
        if !self.xref_prefix.is_empty() {
            if let Some(rest) = target.strip_prefix(&self.xref_prefix) {
                if !rest.is_empty() {
                    return rest.to_string();
                }
            }
        }
        target.to_string()
    }
}

/// Targets are short lowercase slugs; anything else cannot address a section.
pub fn is_valid_target(target: &str) -> bool {
    !target.is_empty()
        && target
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_from(json: &str) -> Manifest {
        serde_json::from_str(json).unwrap()
    }

    fn sample() -> Manifest {
        manifest_from(
            r#"{
                "title": "Atlas of Eldenmoor",
                "blurb": "A field guide.",
                "groups": [
                    {
                        "label": "World",
                        "sections": [
                            { "id": "regions", "label": "Regions" },
                            { "id": "factions", "label": "Factions" }
                        ]
                    },
                    {
                        "label": "Items",
                        "sections": [
                            { "id": "relics", "label": "Relics" }
                        ]
                    }
                ],
                "aliases": { "ref-old-regions": "regions" }
            }"#,
        )
    }

    #[test]
    fn parses_full_manifest() {
        let m = sample();
        assert_eq!(m.title, "Atlas of Eldenmoor");
        assert_eq!(m.groups.len(), 2);
        assert_eq!(m.section_count(), 3);
        assert_eq!(m.xref_prefix, "ref-");
    }

    #[test]
    fn missing_optional_fields_default() {
        let m = manifest_from(r#"{ "title": "Bare" }"#);
        assert_eq!(m.blurb, "");
        assert!(m.groups.is_empty());
        assert!(m.aliases.is_empty());
        assert_eq!(m.xref_prefix, "ref-");
    }

    #[test]
    fn label_lookup() {
        let m = sample();
        assert_eq!(m.label_for("factions"), Some("Factions"));
        assert_eq!(m.label_for("nope"), None);
    }

    #[test]
    fn resolve_key_alias_table_wins() {
        let m = sample();
        assert_eq!(m.resolve_key("ref-old-regions"), "regions");
    }

    #[test]
    fn resolve_key_strips_recognized_prefix() {
        let m = sample();
        assert_eq!(m.resolve_key("ref-relics"), "relics");
    }

    #[test]
    fn resolve_key_strips_prefix_exactly_once() {
        let m = sample();
        assert_eq!(m.resolve_key("ref-ref-relics"), "ref-relics");
    }

    #[test]
    fn resolve_key_identity_otherwise() {
        let m = sample();
        assert_eq!(m.resolve_key("regions"), "regions");
        // A bare prefix has no key after it; treat it as an ordinary target.
        assert_eq!(m.resolve_key("ref-"), "ref-");
    }

    #[test]
    fn resolve_key_is_deterministic() {
        let m = sample();
        assert_eq!(m.resolve_key("ref-relics"), m.resolve_key("ref-relics"));
    }

    #[test]
    fn custom_prefix_honored() {
        let m = manifest_from(r#"{ "title": "T", "xref_prefix": "see-" }"#);
        assert_eq!(m.resolve_key("see-lore"), "lore");
        assert_eq!(m.resolve_key("ref-lore"), "ref-lore");
    }

    #[test]
    fn target_validation() {
        assert!(is_valid_target("regions"));
        assert!(is_valid_target("prod-7"));
        assert!(!is_valid_target(""));
        assert!(!is_valid_target("Regions"));
        assert!(!is_valid_target("a/b"));
        assert!(!is_valid_target("a b"));
        assert!(!is_valid_target("a.json"));
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("toc.json"), "{ not json").unwrap();
        let err = Manifest::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(
            err.to_string().contains("toc.json"),
            "error should name the file, got: {err}"
        );
    }

    #[test]
    fn load_round_trips_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("toc.json"),
            r#"{ "title": "Disk", "groups": [] }"#,
        )
        .unwrap();
        let m = Manifest::load(dir.path()).unwrap();
        assert_eq!(m.title, "Disk");
    }
}
