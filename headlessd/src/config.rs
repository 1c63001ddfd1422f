//! Persisted agent preferences.

use headless_core::{AgentPreferences, PreferencesPatch};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Source of the agent preferences the controller projects and launches from.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<AgentPreferences, ConfigError>;

    fn save(&self, preferences: &AgentPreferences) -> Result<(), ConfigError>;

    /// Merge a partial update into the stored preferences and persist it.
    fn update(&self, patch: PreferencesPatch) -> Result<AgentPreferences, ConfigError> {
        let mut preferences = self.load()?;
        preferences.apply(patch);
        self.save(&preferences)?;
        Ok(preferences)
    }
}

/// Preferences kept as a JSON document on disk.
///
/// Reads and writes from this process are serialized; each write goes to its
/// own temp file and is renamed into place.
pub struct JsonFileStore {
    path: PathBuf,
    default_agent_home: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, default_agent_home: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_agent_home: default_agent_home.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the preferences file with generated defaults unless it exists.
    ///
    /// Run once at boot so the global id is fixed before anything reads it.
    pub fn initialize(&self) -> Result<AgentPreferences, ConfigError> {
        let _guard = self.lock.lock();
        match self.read() {
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                let preferences = self.defaults();
                tracing::info!(
                    path = %self.path.display(),
                    global_id = %preferences.global_id,
                    "Writing default agent preferences"
                );
                self.write(&preferences)?;
                Ok(preferences)
            }
            other => other,
        }
    }

    fn defaults(&self) -> AgentPreferences {
        let mut preferences = AgentPreferences::new(&self.default_agent_home);
        preferences.global_id = nanoid::nanoid!();
        preferences
    }

    fn read(&self) -> Result<AgentPreferences, ConfigError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;

        let mut preferences: AgentPreferences =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        preferences.strip_reserved();
        Ok(preferences)
    }

    fn write(&self, preferences: &AgentPreferences) -> Result<(), ConfigError> {
        let mut contents = serde_json::to_vec_pretty(preferences)?;
        contents.push(b'\n');

        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", nanoid::nanoid!(8)));
        let written = std::fs::File::create(&temp_path).and_then(|mut file| {
            file.write_all(&contents)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| std::fs::rename(&temp_path, &self.path)) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(write_err(e));
        }
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<AgentPreferences, ConfigError> {
        let _guard = self.lock.lock();
        self.read()
    }

    fn save(&self, preferences: &AgentPreferences) -> Result<(), ConfigError> {
        let _guard = self.lock.lock();
        self.write(preferences)
    }

    fn update(&self, patch: PreferencesPatch) -> Result<AgentPreferences, ConfigError> {
        let _guard = self.lock.lock();
        let mut preferences = self.read()?;
        preferences.apply(patch);
        self.write(&preferences)?;
        Ok(preferences)
    }
}
