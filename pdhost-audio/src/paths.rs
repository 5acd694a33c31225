use std::path::PathBuf;

use crate::config::Config;
use crate::engine::default_library_name;

/// Resolve the libpd shared library.
///
/// Fallback chain:
/// 1. `PDHOST_LIBPD` env var (runtime override)
/// 2. `[engine] library` in the config
/// 3. The platform library name, found through the loader's search path
pub fn library_path(config: &Config) -> PathBuf {
    if let Some(path) = std::env::var_os("PDHOST_LIBPD") {
        return PathBuf::from(path);
    }
    if let Some(path) = config.library() {
        return path.to_path_buf();
    }
    PathBuf::from(default_library_name())
}

/// Resolve the directory patches are opened from.
///
/// Fallback chain:
/// 1. `PDHOST_PATCH_DIR` env var (runtime override)
/// 2. `[patches] directory` in the config
/// 3. `./patches` relative to CWD
pub fn patch_dir(config: &Config) -> PathBuf {
    if let Some(dir) = std::env::var_os("PDHOST_PATCH_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = config.patch_directory() {
        return dir.to_path_buf();
    }
    PathBuf::from("patches")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_values_are_used_without_env() {
        if std::env::var_os("PDHOST_PATCH_DIR").is_some() || std::env::var_os("PDHOST_LIBPD").is_some() {
            return;
        }
        let config = Config::load_with(None);
        assert_eq!(patch_dir(&config), PathBuf::from("patches"));
        assert_eq!(library_path(&config), PathBuf::from(default_library_name()));
    }
}
