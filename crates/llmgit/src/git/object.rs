//! Git object model.
//!
//! Ids, hashing, and the tree and commit codecs come from `gix-hash` and
//! `gix-object`; this module stores the results as loose objects
//! (`.git/objects/<2 hex>/<38 hex>`, zlib) through [`FileSystem`], so a
//! workspace built here can be inspected with `git log` or `git cat-file`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use gix_object::bstr::ByteSlice;
use gix_object::tree::{self, EntryKind};
use gix_object::{CommitRef, TreeRef, WriteTo};
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// A SHA-1 object name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(gix_hash::ObjectId);

impl ObjectId {
    /// The all-zero id Git uses for "no object" in ref updates.
    pub const ZERO: ObjectId = ObjectId(gix_hash::ObjectId::null(gix_hash::Kind::Sha1));

    /// Parse a 40-character hex id.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        gix_hash::ObjectId::from_hex(hex.as_bytes())
            .map(Self)
            .map_err(|_| Error::corrupt(format!("invalid object id '{}'", hex)))
    }

    /// Hash an object body the way Git does.
    pub fn hash(kind: ObjectKind, body: &[u8]) -> Result<Self> {
        gix_object::compute_hash(gix_hash::Kind::Sha1, kind.into(), body)
            .map(Self)
            .map_err(|e| Error::corrupt(e.to_string()))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// True for [`ObjectId::ZERO`].
    pub fn is_zero(&self) -> bool {
        self.0.is_null()
    }
}

impl From<gix_hash::ObjectId> for ObjectId {
    fn from(id: gix_hash::ObjectId) -> Self {
        Self(id)
    }
}

impl From<ObjectId> for gix_hash::ObjectId {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// SHA-1 over raw bytes, as used by pack and index trailers.
pub(crate) fn checksum(data: &[u8]) -> Result<ObjectId> {
    let mut hasher = gix_hash::hasher(gix_hash::Kind::Sha1);
    hasher.update(data);
    hasher
        .try_finalize()
        .map(ObjectId)
        .map_err(|e| Error::corrupt(e.to_string()))
}

/// The object kinds this pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    /// Name used in the loose-object header.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }

    /// Type number in a packfile object header.
    pub(crate) fn pack_type(&self) -> u8 {
        match self {
            ObjectKind::Commit => 1,
            ObjectKind::Tree => 2,
            ObjectKind::Blob => 3,
        }
    }

    pub(crate) fn from_pack_type(ty: u8) -> Result<Self> {
        match ty {
            1 => Ok(ObjectKind::Commit),
            2 => Ok(ObjectKind::Tree),
            3 => Ok(ObjectKind::Blob),
            other => Err(Error::corrupt(format!("unsupported pack object type {}", other))),
        }
    }
}

impl From<ObjectKind> for gix_object::Kind {
    fn from(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Blob => gix_object::Kind::Blob,
            ObjectKind::Tree => gix_object::Kind::Tree,
            ObjectKind::Commit => gix_object::Kind::Commit,
        }
    }
}

impl TryFrom<gix_object::Kind> for ObjectKind {
    type Error = Error;

    fn try_from(kind: gix_object::Kind) -> Result<Self> {
        match kind {
            gix_object::Kind::Blob => Ok(ObjectKind::Blob),
            gix_object::Kind::Tree => Ok(ObjectKind::Tree),
            gix_object::Kind::Commit => Ok(ObjectKind::Commit),
            gix_object::Kind::Tag => Err(Error::corrupt("tag objects are not supported")),
        }
    }
}

/// Serialize any gix object into its canonical body.
fn encode(object: &impl WriteTo) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(object.size() as usize);
    object.write_to(&mut body)?;
    Ok(body)
}

pub(crate) fn parse_tree(body: &[u8]) -> Result<TreeRef<'_>> {
    TreeRef::from_bytes(body).map_err(|e| Error::corrupt(format!("tree: {}", e)))
}

pub(crate) fn parse_commit(body: &[u8]) -> Result<gix_object::Commit> {
    CommitRef::from_bytes(body)
        .map(CommitRef::into_owned)
        .map_err(|e| Error::corrupt(format!("commit: {}", e)))
}

/// Loose-object store inside a `.git` directory.
pub(crate) struct ObjectStore<'a> {
    fs: &'a dyn FileSystem,
    objects_dir: PathBuf,
}

impl<'a> ObjectStore<'a> {
    pub fn new(fs: &'a dyn FileSystem, git_dir: &Path) -> Self {
        Self {
            fs,
            objects_dir: git_dir.join("objects"),
        }
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Store an object and return its id. Existing objects are not rewritten.
    pub async fn write(&self, kind: ObjectKind, body: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::hash(kind, body)?;
        let path = self.object_path(&id);

        if self.fs.exists(&path).await? {
            return Ok(id);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&gix_object::encode::loose_header(kind.into(), body.len() as u64))?;
        encoder.write_all(body)?;
        let compressed = encoder.finish()?;

        if let Some(dir) = path.parent() {
            self.fs.mkdir(dir, true).await?;
        }
        self.fs.write_file(&path, &compressed).await?;

        tracing::trace!(id = %id, kind = kind.as_str(), size = body.len(), "wrote object");
        Ok(id)
    }

    /// Encode and store a gix tree or commit.
    pub async fn write_object(&self, object: &impl WriteTo) -> Result<ObjectId> {
        let kind = ObjectKind::try_from(object.kind())?;
        self.write(kind, &encode(object)?).await
    }

    pub async fn contains(&self, id: &ObjectId) -> Result<bool> {
        self.fs.exists(&self.object_path(id)).await
    }

    pub async fn read(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>)> {
        let compressed = self.fs.read_file(&self.object_path(id)).await?;

        let mut raw = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut raw)
            .map_err(|e| Error::corrupt(format!("object {}: {}", id, e)))?;

        let (kind, len, header_len) = gix_object::decode::loose_header(&raw)
            .map_err(|e| Error::corrupt(format!("object {}: {}", id, e)))?;
        let kind = ObjectKind::try_from(kind)?;

        let body = raw.split_off(header_len);
        if body.len() as u64 != len {
            return Err(Error::corrupt(format!(
                "object {}: expected {} bytes, found {}",
                id,
                len,
                body.len()
            )));
        }

        Ok((kind, body))
    }

    async fn read_kind(&self, id: &ObjectId, expected: ObjectKind) -> Result<Vec<u8>> {
        let (kind, body) = self.read(id).await?;
        if kind != expected {
            return Err(Error::corrupt(format!(
                "object {} is a {}, expected {}",
                id,
                kind.as_str(),
                expected.as_str()
            )));
        }
        Ok(body)
    }

    pub async fn read_blob(&self, id: &ObjectId) -> Result<Vec<u8>> {
        self.read_kind(id, ObjectKind::Blob).await
    }

    pub async fn read_commit(&self, id: &ObjectId) -> Result<gix_object::Commit> {
        parse_commit(&self.read_kind(id, ObjectKind::Commit).await?)
    }

    /// Flatten a tree into `path -> blob id`.
    pub async fn flatten_tree(&self, root: &ObjectId) -> Result<BTreeMap<String, ObjectId>> {
        let mut files = BTreeMap::new();
        let mut pending = vec![(String::new(), *root)];

        while let Some((prefix, tree_id)) = pending.pop() {
            let body = self.read_kind(&tree_id, ObjectKind::Tree).await?;
            for entry in parse_tree(&body)?.entries {
                let name = entry.filename.to_str_lossy();
                let path = if prefix.is_empty() {
                    name.into_owned()
                } else {
                    format!("{}/{}", prefix, name)
                };
                let id = ObjectId::from(gix_hash::ObjectId::from(entry.oid));
                if entry.mode.is_tree() {
                    pending.push((path, id));
                } else {
                    files.insert(path, id);
                }
            }
        }

        Ok(files)
    }

    /// Write the nested trees for a flat `path -> blob id` map and return
    /// the root tree id.
    pub async fn write_tree(&self, files: &BTreeMap<String, ObjectId>) -> Result<ObjectId> {
        let mut dirs: BTreeMap<String, gix_object::Tree> = BTreeMap::new();
        dirs.insert(String::new(), gix_object::Tree::empty());

        for (path, id) in files {
            let (dir, name) = split_parent(path);
            let mut ancestor = dir;
            while !ancestor.is_empty() && !dirs.contains_key(ancestor) {
                dirs.insert(ancestor.to_string(), gix_object::Tree::empty());
                ancestor = split_parent(ancestor).0;
            }
            dirs.entry(dir.to_string())
                .or_default()
                .entries
                .push(tree_entry(EntryKind::Blob, name, *id));
        }

        // Deepest directories first so every subtree id is known before its parent is written.
        let mut order: Vec<String> = dirs.keys().cloned().collect();
        order.sort_by_key(|dir| std::cmp::Reverse(depth(dir)));

        let mut root = None;
        for dir in order {
            let mut tree = dirs.remove(&dir).unwrap_or_default();
            tree.entries.sort();
            let id = self.write_object(&tree).await?;
            if dir.is_empty() {
                root = Some(id);
            } else {
                let (parent, name) = split_parent(&dir);
                dirs.entry(parent.to_string())
                    .or_default()
                    .entries
                    .push(tree_entry(EntryKind::Tree, name, id));
            }
        }

        root.ok_or_else(|| Error::Internal("root tree was not written".to_string()))
    }

    /// Every object reachable from `tip`, minus those reachable from `exclude`.
    ///
    /// Returned commits come before their trees and blobs.
    pub async fn reachable(
        &self,
        tip: &ObjectId,
        exclude: Option<&ObjectId>,
    ) -> Result<Vec<(ObjectId, ObjectKind, Vec<u8>)>> {
        let mut seen = HashSet::new();
        if let Some(exclude) = exclude {
            for (id, _, _) in self.walk(exclude, &HashSet::new()).await? {
                seen.insert(id);
            }
        }
        self.walk(tip, &seen).await
    }

    async fn walk(
        &self,
        tip: &ObjectId,
        skip: &HashSet<ObjectId>,
    ) -> Result<Vec<(ObjectId, ObjectKind, Vec<u8>)>> {
        let mut out = Vec::new();
        let mut seen = skip.clone();
        let mut pending = vec![*tip];

        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            let (kind, body) = self.read(&id).await?;
            match kind {
                ObjectKind::Commit => {
                    let commit = parse_commit(&body)?;
                    pending.extend(commit.parents.iter().copied().map(ObjectId::from));
                    pending.push(commit.tree.into());
                }
                ObjectKind::Tree => {
                    let tree = parse_tree(&body)?;
                    pending.extend(
                        tree.entries
                            .iter()
                            .map(|e| ObjectId::from(gix_hash::ObjectId::from(e.oid))),
                    );
                }
                ObjectKind::Blob => {}
            }
            out.push((id, kind, body));
        }

        Ok(out)
    }

    /// True when `ancestor` is `descendant` or one of its ancestors.
    pub async fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool> {
        let mut seen = HashSet::new();
        let mut pending = vec![*descendant];

        while let Some(id) = pending.pop() {
            if id == *ancestor {
                return Ok(true);
            }
            if !seen.insert(id) || !self.contains(&id).await? {
                continue;
            }
            let commit = self.read_commit(&id).await?;
            pending.extend(commit.parents.into_iter().map(ObjectId::from));
        }

        Ok(false)
    }
}

fn tree_entry(kind: EntryKind, name: &str, id: ObjectId) -> tree::Entry {
    tree::Entry {
        mode: kind.into(),
        filename: name.into(),
        oid: id.into(),
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

fn depth(dir: &str) -> usize {
    if dir.is_empty() {
        0
    } else {
        dir.matches('/').count() + 1
    }
}
