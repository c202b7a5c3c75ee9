//! Checkpoint system for saving and loading populations.
//!
//! Files ending in `.json` are written as pretty JSON. Anything else is
//! binary: the magic bytes `GNLS` followed by a bincode payload.

use crate::neural::{DataError, NetworkData};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"GNLS";

/// Errors that can occur during checkpoint operations
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Generation counter plus every serialized network of a population
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationCheckpoint {
    /// Version for compatibility checking
    pub version: u32,
    pub generation: u64,
    pub networks: Vec<NetworkData>,
}

impl PopulationCheckpoint {
    /// Current checkpoint version
    pub const VERSION: u32 = 1;

    pub fn new(generation: u64, networks: Vec<NetworkData>) -> Self {
        Self {
            version: Self::VERSION,
            generation,
            networks,
        }
    }

    /// Save, picking the format from the file extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        if is_json(path) {
            serde_json::to_writer_pretty(&mut writer, self)?;
        } else {
            writer.write_all(MAGIC)?;
            bincode::serialize_into(&mut writer, self)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load a checkpoint written by [`PopulationCheckpoint::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let checkpoint: PopulationCheckpoint = if is_json(path) {
            serde_json::from_reader(reader)?
        } else {
            let mut magic = [0u8; 4];
            reader.read_exact(&mut magic)?;
            if &magic != MAGIC {
                return Err(CheckpointError::InvalidFormat(
                    "invalid magic bytes".to_string(),
                ));
            }
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer)?;
            bincode::deserialize(&buffer)?
        };

        if checkpoint.version != Self::VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: Self::VERSION,
                found: checkpoint.version,
            });
        }
        Ok(checkpoint)
    }

    /// Approximate binary size in bytes
    pub fn size_bytes(&self) -> usize {
        bincode::serialized_size(self).unwrap_or(0) as usize + MAGIC.len()
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
}

/// Checkpoint manager for automatic saving
pub struct CheckpointManager {
    /// Base directory for checkpoints
    pub base_dir: PathBuf,
    /// Generations between checkpoints
    pub interval: u64,
    /// Maximum checkpoints to keep
    pub max_checkpoints: usize,
    last_checkpoint: u64,
}

impl CheckpointManager {
    /// Create a manager, creating its directory if needed
    pub fn new<P: Into<PathBuf>>(
        base_dir: P,
        interval: u64,
        max_checkpoints: usize,
    ) -> Result<Self, CheckpointError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;

        Ok(Self {
            base_dir,
            interval,
            max_checkpoints,
            last_checkpoint: 0,
        })
    }

    /// Check if a checkpoint should be saved
    pub fn should_save(&self, generation: u64) -> bool {
        self.interval > 0
            && generation > 0
            && generation % self.interval == 0
            && generation != self.last_checkpoint
    }

    /// Generate checkpoint filename
    pub fn checkpoint_path(&self, generation: u64) -> PathBuf {
        self.base_dir
            .join(format!("checkpoint_{:08}.bin", generation))
    }

    /// Save checkpoint and drop the oldest beyond the limit
    pub fn save(&mut self, checkpoint: &PopulationCheckpoint) -> Result<PathBuf, CheckpointError> {
        let path = self.checkpoint_path(checkpoint.generation);
        checkpoint.save(&path)?;
        self.last_checkpoint = checkpoint.generation;
        log::info!(
            "checkpoint saved: generation {} -> {}",
            checkpoint.generation,
            path.display()
        );

        self.cleanup()?;
        Ok(path)
    }

    fn checkpoint_files(&self) -> Result<Vec<PathBuf>, CheckpointError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("checkpoint_")
            })
            .map(|entry| entry.path())
            .collect();
        // Zero-padded generation keeps name order chronological
        files.sort();
        Ok(files)
    }

    fn cleanup(&self) -> Result<(), CheckpointError> {
        let files = self.checkpoint_files()?;
        if files.len() > self.max_checkpoints {
            let to_remove = files.len() - self.max_checkpoints;
            for path in files.into_iter().take(to_remove) {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Find latest checkpoint in directory
    pub fn find_latest(&self) -> Option<PathBuf> {
        self.checkpoint_files().ok()?.pop()
    }
}
