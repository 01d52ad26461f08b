//! Git index (`.git/index`).
//!
//! The file format is handled by `gix-index` on in-memory buffers. Only
//! mode, size, object id and path are meaningful here; the other stat
//! fields are written as zero, which stock Git accepts and simply refreshes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use gix_index::entry::{Flags, Mode, Stat};
use gix_index::{File, State, write};
use gix_object::bstr::ByteSlice;

use super::object::{ObjectId, checksum};
use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// A staged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub id: ObjectId,
    pub mode: Mode,
    pub size: u32,
}

/// In-memory view of the index keyed by slash-separated path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Index {
    entries: BTreeMap<String, IndexEntry>,
}

impl Index {
    fn path(git_dir: &Path) -> PathBuf {
        git_dir.join("index")
    }

    /// Load the index; a missing or empty file is an empty index.
    pub async fn load(fs: &dyn FileSystem, git_dir: &Path) -> Result<Self> {
        match fs.read_file(&Self::path(git_dir)).await {
            Ok(data) if data.is_empty() => Ok(Self::default()),
            Ok(data) => Self::decode(&data),
            Err(e) if e.is_not_found() => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self, fs: &dyn FileSystem, git_dir: &Path) -> Result<()> {
        fs.write_file(&Self::path(git_dir), &self.encode(git_dir)?)
            .await
    }

    pub fn insert(&mut self, path: impl Into<String>, id: ObjectId, size: usize) {
        self.entries.insert(
            path.into(),
            IndexEntry {
                id,
                mode: Mode::FILE,
                size: u32::try_from(size).unwrap_or(u32::MAX),
            },
        );
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `path -> id` snapshot used to build the commit tree.
    pub fn to_tree_map(&self) -> BTreeMap<String, ObjectId> {
        self.entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.id))
            .collect()
    }

    /// Serialize as a version 2 index with its SHA-1 trailer.
    pub fn encode(&self, git_dir: &Path) -> Result<Vec<u8>> {
        let mut state = State::new(gix_hash::Kind::Sha1);
        for (path, entry) in &self.entries {
            let stat = Stat {
                size: entry.size,
                ..Default::default()
            };
            state.dangerously_push_entry(
                stat,
                entry.id.into(),
                Flags::empty(),
                entry.mode,
                path.as_str().into(),
            );
        }
        state.sort_entries();

        let options = write::Options {
            extensions: write::Extensions::None,
            skip_hash: false,
        };
        let mut out = Vec::new();
        File::from_state(state, Self::path(git_dir))
            .write_to(&mut out, options)
            .map_err(|e| Error::Internal(format!("failed to encode index: {}", e)))?;
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (state, stored) = State::from_bytes(
            data,
            FileTime::zero(),
            gix_hash::Kind::Sha1,
            Default::default(),
        )
        .map_err(|e| Error::corrupt(format!("index: {}", e)))?;

        // A null trailer means the writer skipped hashing (`index.skipHash`).
        if let Some(stored) = stored {
            let body = &data[..data.len() - stored.as_slice().len()];
            if checksum(body)? != ObjectId::from(stored) {
                return Err(Error::corrupt("index checksum mismatch"));
            }
        }

        let entries = state
            .entries()
            .iter()
            .map(|entry| {
                let path = entry.path(&state).to_str_lossy().into_owned();
                let staged = IndexEntry {
                    id: entry.id.into(),
                    mode: entry.mode,
                    size: entry.stat.size,
                };
                (path, staged)
            })
            .collect();

        Ok(Self { entries })
    }
}
