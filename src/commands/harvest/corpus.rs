use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

/// Append-only corpus file. Opened at the last checkpoint's offset so any
/// bytes written after that checkpoint are dropped and rewritten.
pub struct CorpusWriter {
    path: PathBuf,
    file: File,
    offset: u64,
}

impl CorpusWriter {
    pub fn open(path: &Path, checkpoint_offset: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open corpus {}", path.display()))?;

        let length = file
            .metadata()
            .with_context(|| format!("failed to stat corpus {}", path.display()))?
            .len();
        if length < checkpoint_offset {
            bail!(
                "corpus {} is {} bytes but the checkpoint expects {}; refusing to resume (use --fresh to start over)",
                path.display(),
                length,
                checkpoint_offset
            );
        }
        if length > checkpoint_offset {
            warn!(
                path = %path.display(),
                length,
                checkpoint_offset,
                "dropping corpus bytes written after the last checkpoint"
            );
            file.set_len(checkpoint_offset)
                .with_context(|| format!("failed to truncate corpus {}", path.display()))?;
        }

        file.seek(SeekFrom::Start(checkpoint_offset))
            .with_context(|| format!("failed to seek corpus {}", path.display()))?;
        info!(path = %path.display(), offset = checkpoint_offset, "opened corpus");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset: checkpoint_offset,
        })
    }

    pub fn append(&mut self, record: &str) -> Result<u64> {
        self.file
            .write_all(record.as_bytes())
            .with_context(|| format!("failed to append to corpus {}", self.path.display()))?;
        self.offset += record.len() as u64;
        Ok(self.offset)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file
            .flush()
            .and_then(|_| self.file.sync_data())
            .with_context(|| format!("failed to sync corpus {}", self.path.display()))
    }
}
