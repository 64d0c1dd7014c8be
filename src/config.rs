//! Session configuration
//!
//! Stored as TOML. Every table and field is optional; missing values take the
//! defaults below.
//!
//! ```toml
//! [session]
//! duplicate_names_allowed = true
//! import_prefix = ""
//! import_filter = "*.*"
//!
//! [patch]
//! renamed_letter = 13
//! patch_letter = 26
//!
//! [formats]
//! swf = true
//! flat = true
//! wipf = true
//! ```

use crate::archive::format::validate_letter;
use crate::container::Capabilities;
use crate::error::{AldError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub patch: PatchConfig,
    /// Container formats whose sub-resources are exposed
    pub formats: Capabilities,
}

/// Import and export behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Importing a name that already exists adds a second entry instead of
    /// replacing the first one's payload
    pub duplicate_names_allowed: bool,

    /// Keep directory components of entry names when exporting
    pub include_directories_when_exporting: bool,

    /// Name imported files by their path relative to the import root
    pub keep_directory_names_when_importing: bool,

    /// Prepended to the names of newly imported files
    pub import_prefix: String,

    /// `;`-separated wildcard patterns for directory imports
    pub import_filter: String,

    /// Files last modified before this Unix time are skipped on import
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_modified_unix: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duplicate_names_allowed: true,
            include_directories_when_exporting: true,
            keep_directory_names_when_importing: false,
            import_prefix: String::new(),
            import_filter: "*.*".to_string(),
            min_modified_unix: None,
        }
    }
}

/// Volume letters used by lettered patches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Letter the original first volume is moved to (`M`)
    pub renamed_letter: u8,
    /// Letter of the volume holding patched entries (`Z`)
    pub patch_letter: u8,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            renamed_letter: 13,
            patch_letter: 26,
        }
    }
}

impl Config {
    /// Load from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        let PatchConfig {
            renamed_letter,
            patch_letter,
        } = self.patch;
        validate_letter(renamed_letter)?;
        validate_letter(patch_letter)?;
        if renamed_letter == 1 || patch_letter == 1 || renamed_letter == patch_letter {
            return Err(AldError::ArgumentInvalid(format!(
                "patch letters {} and {} must differ from each other and from 1",
                renamed_letter, patch_letter
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.patch.renamed_letter, 13);
        assert_eq!(config.patch.patch_letter, 26);
        assert_eq!(config.session.import_filter, "*.*");
        assert!(config.formats.swf);
    }

    #[test]
    fn test_partial_tables() {
        let config = Config::from_toml_str(
            r#"
            [session]
            import_prefix = "patch\\"
            min_modified_unix = 1700000000

            [formats]
            wipf = false
            "#,
        )
        .unwrap();

        assert_eq!(config.session.import_prefix, "patch\\");
        assert_eq!(config.session.min_modified_unix, Some(1_700_000_000));
        assert!(config.session.duplicate_names_allowed);
        assert!(!config.formats.wipf);
        assert!(config.formats.flat);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = Config::default();
        config.patch.renamed_letter = 12;
        config.session.keep_directory_names_when_importing = true;

        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_patch_letters() {
        assert!(Config::from_toml_str("[patch]\npatch_letter = 27").is_err());
        assert!(Config::from_toml_str("[patch]\nrenamed_letter = 26").is_err());
        assert!(Config::from_toml_str("[patch]\nrenamed_letter = 1").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aldtool.toml");
        fs::write(&path, "[patch]\nrenamed_letter = 14\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.patch.renamed_letter, 14);
    }
}
