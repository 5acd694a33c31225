use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::devices::{BufferSize, OutputConfig};
use crate::manager::EngineSettings;
use crate::paths;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    audio: AudioConfig,
    #[serde(default)]
    patches: PatchesConfig,
}

#[derive(Deserialize, Default)]
struct EngineConfig {
    library: Option<PathBuf>,
    verbose: Option<bool>,
    verbose_print: Option<bool>,
    search_paths: Option<Vec<PathBuf>>,
}

#[derive(Deserialize, Default)]
struct AudioConfig {
    sample_rate: Option<u32>,
    buffer_frames: Option<u32>,
    device: Option<String>,
}

#[derive(Deserialize, Default)]
struct PatchesConfig {
    directory: Option<PathBuf>,
}

pub struct Config {
    engine: EngineConfig,
    audio: AudioConfig,
    patches: PatchesConfig,
}

impl Config {
    /// Embedded defaults merged with the user's config file, if any.
    pub fn load() -> Self {
        Self::load_with(user_config_path().as_deref())
    }

    /// Embedded defaults merged with the file at `path`, if given. A missing,
    /// unreadable or malformed file leaves the defaults in place.
    pub fn load_with(path: Option<&Path>) -> Self {
        let mut base: ConfigFile = match toml::from_str(DEFAULT_CONFIG) {
            Ok(base) => base,
            Err(e) => {
                log::error!(target: "config", "embedded config.toml is invalid: {}", e);
                ConfigFile::default()
            }
        };

        if let Some(path) = path.filter(|p| p.exists()) {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                    Ok(user) => {
                        merge_engine(&mut base.engine, user.engine);
                        merge_audio(&mut base.audio, user.audio);
                        merge_patches(&mut base.patches, user.patches);
                    }
                    Err(e) => {
                        log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                    }
                },
                Err(e) => {
                    log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                }
            }
        }

        Config {
            engine: base.engine,
            audio: base.audio,
            patches: base.patches,
        }
    }

    /// Configured libpd path, before environment overrides.
    pub fn library(&self) -> Option<&Path> {
        self.engine.library.as_deref()
    }

    pub fn verbose(&self) -> bool {
        self.engine.verbose.unwrap_or(false)
    }

    pub fn verbose_print(&self) -> bool {
        self.engine.verbose_print.unwrap_or(true)
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        self.engine.search_paths.as_deref().unwrap_or(&[])
    }

    /// Configured patch directory, before environment overrides.
    pub fn patch_directory(&self) -> Option<&Path> {
        self.patches.directory.as_deref()
    }

    /// Host buffer size; unsupported values fall back to the default.
    pub fn buffer_size(&self) -> BufferSize {
        match self.audio.buffer_frames {
            None => BufferSize::default(),
            Some(frames) => BufferSize::from_frames(frames).unwrap_or_else(|| {
                log::warn!(target: "config", "unsupported buffer_frames {}; using default", frames);
                BufferSize::default()
            }),
        }
    }

    pub fn output_config(&self) -> OutputConfig {
        OutputConfig {
            device: self.audio.device.clone(),
            buffer_size: self.buffer_size(),
            sample_rate: self.audio.sample_rate,
        }
    }

    /// Engine settings with paths resolved through the environment.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            verbose: self.verbose(),
            verbose_print: self.verbose_print(),
            search_paths: self.search_paths().to_vec(),
            default_patch_dir: Some(paths::patch_dir(self)),
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pdhost").join("config.toml"))
}

fn merge_engine(base: &mut EngineConfig, user: EngineConfig) {
    if user.library.is_some() {
        base.library = user.library;
    }
    if user.verbose.is_some() {
        base.verbose = user.verbose;
    }
    if user.verbose_print.is_some() {
        base.verbose_print = user.verbose_print;
    }
    if user.search_paths.is_some() {
        base.search_paths = user.search_paths;
    }
}

fn merge_audio(base: &mut AudioConfig, user: AudioConfig) {
    if user.sample_rate.is_some() {
        base.sample_rate = user.sample_rate;
    }
    if user.buffer_frames.is_some() {
        base.buffer_frames = user.buffer_frames;
    }
    if user.device.is_some() {
        base.device = user.device;
    }
}

fn merge_patches(base: &mut PatchesConfig, user: PatchesConfig) {
    if user.directory.is_some() {
        base.directory = user.directory;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn user_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn embedded_defaults() {
        let config = Config::load_with(None);
        assert!(config.library().is_none());
        assert!(!config.verbose());
        assert!(config.verbose_print());
        assert!(config.search_paths().is_empty());
        assert_eq!(config.buffer_size(), BufferSize::B256);
        assert_eq!(config.patch_directory(), Some(Path::new("patches")));
        assert_eq!(config.output_config().sample_rate, None);
    }

    #[test]
    fn user_values_override_defaults() {
        let file = user_file(
            r#"
[engine]
library = "/opt/libpd.so"
verbose_print = false
search_paths = ["/abs"]

[audio]
sample_rate = 44100
buffer_frames = 512
device = "USB"
"#,
        );
        let config = Config::load_with(Some(file.path()));
        assert_eq!(config.library(), Some(Path::new("/opt/libpd.so")));
        assert!(!config.verbose_print());
        assert_eq!(config.search_paths(), &[PathBuf::from("/abs")]);
        let out = config.output_config();
        assert_eq!(out.sample_rate, Some(44_100));
        assert_eq!(out.buffer_size, BufferSize::B512);
        assert_eq!(out.device.as_deref(), Some("USB"));
        // Untouched sections keep their defaults.
        assert_eq!(config.patch_directory(), Some(Path::new("patches")));
    }

    #[test]
    fn malformed_user_file_is_ignored() {
        let file = user_file("[engine\nverbose_print = nope");
        let config = Config::load_with(Some(file.path()));
        assert!(config.verbose_print());
    }

    #[test]
    fn unsupported_buffer_falls_back() {
        let file = user_file("[audio]\nbuffer_frames = 300\n");
        let config = Config::load_with(Some(file.path()));
        assert_eq!(config.buffer_size(), BufferSize::default());
    }

    #[test]
    fn missing_file_keeps_defaults() {
        let config = Config::load_with(Some(Path::new("/nonexistent/pdhost.toml")));
        assert_eq!(config.buffer_size(), BufferSize::B256);
    }
}
