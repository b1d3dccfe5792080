use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::io::StateArchive;
use crate::value::Value;

use super::structure::{flatten_with_name, pack_sequence_as};
use super::{ProgramStateError, ProgramStateManager};

const STATE_FILE: &str = "state.bin";
const TEMP_SUFFIX: &str = "_temp";

fn default_prefix() -> String {
    "program_state_".to_string()
}

fn default_keep_total() -> usize {
    5
}

fn default_keep_first() -> bool {
    true
}

/// Settings for a [`FileProgramStateManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProgramStateManagerConfig {
    /// Directory holding one sub-directory per saved version.
    pub root_dir: PathBuf,
    /// Version directories are named `{prefix}{version}`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Number of versions retained after a save; `0` keeps everything.
    #[serde(default = "default_keep_total")]
    pub keep_total: usize,
    /// Exempts the lowest version from retention.
    #[serde(default = "default_keep_first")]
    pub keep_first: bool,
}

impl FileProgramStateManagerConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            prefix: default_prefix(),
            keep_total: default_keep_total(),
            keep_first: default_keep_first(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_keep_total(mut self, keep_total: usize) -> Self {
        self.keep_total = keep_total;
        self
    }

    pub fn with_keep_first(mut self, keep_first: bool) -> Self {
        self.keep_first = keep_first;
        self
    }
}

/// Program-state manager backed by a local directory tree.
///
/// Each version lives in `{root_dir}/{prefix}{version}/state.bin`. Saves write
/// into `{prefix}{version}_temp` and rename it into place, so a version
/// directory is either complete or absent.
pub struct FileProgramStateManager {
    config: FileProgramStateManagerConfig,
    structure: RwLock<Option<Value>>,
    saving: Mutex<HashSet<u64>>,
    save_finished: Condvar,
}

impl FileProgramStateManager {
    pub fn new(config: FileProgramStateManagerConfig) -> Result<Self, ProgramStateError> {
        if config.root_dir.as_os_str().is_empty() {
            return Err(ProgramStateError::InvalidArgument(
                "root_dir must not be empty".to_string(),
            ));
        }
        if config.prefix.contains(std::path::is_separator) {
            return Err(ProgramStateError::InvalidArgument(format!(
                "prefix '{}' must not contain a path separator",
                config.prefix
            )));
        }
        fs::create_dir_all(&config.root_dir).map_err(io_error(&config.root_dir))?;
        Ok(Self {
            config,
            structure: RwLock::new(None),
            saving: Mutex::new(HashSet::new()),
            save_finished: Condvar::new(),
        })
    }

    pub fn config(&self) -> &FileProgramStateManagerConfig {
        &self.config
    }

    /// Template used by [`ProgramStateManager::load`] to re-nest saved leaves.
    pub fn set_structure(&self, structure: Value) {
        *self
            .structure
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(structure);
    }

    fn version_path(&self, version: u64) -> PathBuf {
        self.config
            .root_dir
            .join(format!("{}{}", self.config.prefix, version))
    }

    fn parse_version(&self, file_name: &str) -> Option<u64> {
        let digits = file_name.strip_prefix(self.config.prefix.as_str())?;
        let canonical = !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
            && (digits == "0" || !digits.starts_with('0'));
        if canonical {
            digits.parse().ok()
        } else {
            None
        }
    }

    /// Blocks while another thread saves `version`.
    fn lock_version(&self, version: u64) -> VersionGuard<'_> {
        let mut saving = self.saving.lock().unwrap_or_else(PoisonError::into_inner);
        while saving.contains(&version) {
            saving = self
                .save_finished
                .wait(saving)
                .unwrap_or_else(PoisonError::into_inner);
        }
        saving.insert(version);
        VersionGuard {
            manager: self,
            version,
        }
    }

    fn remove_old_program_state(&self) -> Result<(), ProgramStateError> {
        if self.config.keep_total == 0 {
            return Ok(());
        }
        let Some(versions) = self.versions()? else {
            return Ok(());
        };
        let candidates = if self.config.keep_first {
            &versions[1..]
        } else {
            &versions[..]
        };
        if candidates.len() <= self.config.keep_total {
            return Ok(());
        }
        let excess = candidates.len() - self.config.keep_total;
        for &version in &candidates[..excess] {
            match self.remove(version) {
                Ok(()) | Err(ProgramStateError::VersionNotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl ProgramStateManager for FileProgramStateManager {
    fn versions(&self) -> Result<Option<Vec<u64>>, ProgramStateError> {
        let root = &self.config.root_dir;
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(root)(err)),
        };
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(root))?;
            let is_dir = entry
                .file_type()
                .map_err(io_error(&entry.path()))?
                .is_dir();
            if !is_dir {
                continue;
            }
            if let Some(version) = entry.file_name().to_str().and_then(|n| self.parse_version(n)) {
                versions.push(version);
            }
        }
        if versions.is_empty() {
            return Ok(None);
        }
        versions.sort_unstable();
        Ok(Some(versions))
    }

    fn load(&self, version: u64) -> Result<Value, ProgramStateError> {
        let structure = self
            .structure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ProgramStateError::StructureNotConfigured)?;
        let path = self.version_path(version);
        if !path.is_dir() {
            return Err(ProgramStateError::VersionNotFound { version });
        }
        let leaves = StateArchive::load(path.join(STATE_FILE)).map_err(ProgramStateError::Archive)?;
        let program_state =
            pack_sequence_as(&structure, leaves.into_iter().map(|(_, leaf)| leaf).collect())?;
        log::info!("program state loaded: {}", path.display());
        Ok(program_state)
    }

    fn save(&self, program_state: &Value, version: u64) -> Result<(), ProgramStateError> {
        let _guard = self.lock_version(version);
        let path = self.version_path(version);
        if path.exists() {
            return Err(ProgramStateError::VersionAlreadyExists { version });
        }

        let leaves = flatten_with_name(program_state);
        let temp = TempStateDir::create(temp_path_for(&path))?;
        StateArchive::save(temp.path().join(STATE_FILE), &leaves)
            .map_err(ProgramStateError::Archive)?;
        temp.persist(&path, version)?;
        log::info!(
            "program state saved: {} ({} leaves)",
            path.display(),
            leaves.len()
        );

        self.remove_old_program_state()
    }

    fn remove(&self, version: u64) -> Result<(), ProgramStateError> {
        let path = self.version_path(version);
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                log::info!("program state removed: {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(ProgramStateError::VersionNotFound { version })
            }
            Err(err) => Err(io_error(&path)(err)),
        }
    }
}

struct VersionGuard<'a> {
    manager: &'a FileProgramStateManager,
    version: u64,
}

impl Drop for VersionGuard<'_> {
    fn drop(&mut self) {
        self.manager
            .saving
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.version);
        self.manager.save_finished.notify_all();
    }
}

/// Staging directory that is removed unless it is persisted.
struct TempStateDir {
    path: PathBuf,
    armed: bool,
}

impl TempStateDir {
    /// Creates `path`, discarding whatever an earlier interrupted save left there.
    fn create(path: PathBuf) -> Result<Self, ProgramStateError> {
        if path.exists() {
            log::info!("removing leftover program state directory {}", path.display());
            fs::remove_dir_all(&path).map_err(io_error(&path))?;
        }
        fs::create_dir_all(&path).map_err(io_error(&path))?;
        Ok(Self { path, armed: true })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persist(mut self, destination: &Path, version: u64) -> Result<(), ProgramStateError> {
        match fs::rename(&self.path, destination) {
            Ok(()) => {
                self.armed = false;
                Ok(())
            }
            Err(_) if destination.exists() => {
                Err(ProgramStateError::VersionAlreadyExists { version })
            }
            Err(err) => Err(io_error(destination)(err)),
        }
    }
}

impl Drop for TempStateDir {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = fs::remove_dir_all(&self.path) {
                log::warn!(
                    "failed to remove temporary program state {}: {err}",
                    self.path.display()
                );
            }
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ProgramStateError + '_ {
    move |source| ProgramStateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_canonical_versions() {
        let dir = std::env::temp_dir().join(format!("fedrs_parse_{}", std::process::id()));
        let manager = FileProgramStateManager::new(FileProgramStateManagerConfig::new(&dir))
            .expect("manager");
        assert_eq!(manager.parse_version("program_state_0"), Some(0));
        assert_eq!(manager.parse_version("program_state_42"), Some(42));
        assert_eq!(manager.parse_version("program_state_042"), None);
        assert_eq!(manager.parse_version("program_state_4_temp"), None);
        assert_eq!(manager.parse_version("program_state_"), None);
        assert_eq!(manager.parse_version("other_3"), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn temp_path_appends_suffix() {
        let path = Path::new("/tmp/root/program_state_7");
        assert_eq!(temp_path_for(path), PathBuf::from("/tmp/root/program_state_7_temp"));
    }

    #[test]
    fn rejects_empty_root() {
        assert!(matches!(
            FileProgramStateManager::new(FileProgramStateManagerConfig::new("")),
            Err(ProgramStateError::InvalidArgument(_))
        ));
    }
}
