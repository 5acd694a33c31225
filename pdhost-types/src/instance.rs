use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What to load into one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Display name used to attribute log messages.
    #[serde(default)]
    pub name: String,
    /// Patch file name, with or without the `.pd` extension.
    pub patch: String,
    /// Directory the patch is opened from.
    #[serde(default)]
    pub patch_dir: PathBuf,
}

impl InstanceConfig {
    pub fn new(name: impl Into<String>, patch: impl Into<String>, patch_dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            patch: patch.into(),
            patch_dir: patch_dir.as_ref().to_path_buf(),
        }
    }

    /// File name handed to the engine: the patch name with `.pd` appended
    /// unless it already carries the extension.
    pub fn patch_file_name(&self) -> String {
        if self.patch.ends_with(".pd") {
            self.patch.clone()
        } else {
            format!("{}.pd", self.patch)
        }
    }

    /// Name used in log messages; falls back to the patch name.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.patch
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_file_name_appends_extension_once() {
        let cfg = InstanceConfig::new("synth", "osc", "/tmp");
        assert_eq!(cfg.patch_file_name(), "osc.pd");

        let cfg = InstanceConfig::new("synth", "osc.pd", "/tmp");
        assert_eq!(cfg.patch_file_name(), "osc.pd");
    }

    #[test]
    fn display_name_falls_back_to_patch() {
        let cfg = InstanceConfig::new("", "drums", "/tmp");
        assert_eq!(cfg.display_name(), "drums");
    }
}
