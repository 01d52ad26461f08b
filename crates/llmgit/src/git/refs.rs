//! References: `HEAD`, loose refs under `refs/`, and `packed-refs`.

use std::path::Path;

use super::object::ObjectId;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, fs_errors};

pub(crate) const HEAD: &str = "HEAD";
const MAX_SYMREF_DEPTH: usize = 5;

/// Full ref name for a branch, after checking it with
/// [`validate_branch_name`].
pub(crate) fn branch_ref(branch: &str) -> Result<String> {
    validate_branch_name(branch)?;
    Ok(format!("refs/heads/{}", branch))
}

/// Check a short branch name (`main`, `feature/x`) against Git's
/// ref-name rules.
///
/// Rejects `..`, control characters, spaces, any of `~^:?*[\`, a `.lock`
/// suffix, empty or slash-delimited components, and names Git refuses
/// as branches (`HEAD`, a leading `-`). Every ref path written under
/// `.git` goes through this, so a name can never leave `refs/heads/`.
pub fn validate_branch_name(branch: &str) -> Result<()> {
    if branch.starts_with('-') || branch == HEAD || branch == "@" {
        return Err(Error::invalid(format!("invalid branch name {:?}", branch)));
    }
    validate_ref_name(&format!("refs/heads/{}", branch))
        .map_err(|_| Error::invalid(format!("invalid branch name {:?}", branch)))
}

/// Check a full ref name (`refs/heads/main`).
fn validate_ref_name(name: &str) -> Result<()> {
    gix_validate::reference::name(name.into())
        .map(|_| ())
        .map_err(|e| Error::invalid(format!("invalid ref name {:?}: {}", name, e)))
}

enum RefValue {
    Direct(ObjectId),
    Symbolic(String),
}

async fn read_ref(fs: &dyn FileSystem, git_dir: &Path, name: &str) -> Result<Option<RefValue>> {
    match fs.read_file(&git_dir.join(name)).await {
        Ok(data) => {
            let text = String::from_utf8_lossy(&data);
            let text = text.trim();
            if let Some(target) = text.strip_prefix("ref:") {
                return Ok(Some(RefValue::Symbolic(target.trim().to_string())));
            }
            return ObjectId::from_hex(text).map(|id| Some(RefValue::Direct(id)));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    match fs.read_file(&git_dir.join("packed-refs")).await {
        Ok(data) => {
            let text = String::from_utf8_lossy(&data);
            for line in text.lines() {
                if line.starts_with('#') || line.starts_with('^') {
                    continue;
                }
                if let Some((id, ref_name)) = line.split_once(' ') {
                    if ref_name.trim() == name {
                        return ObjectId::from_hex(id).map(|id| Some(RefValue::Direct(id)));
                    }
                }
            }
            Ok(None)
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Resolve a ref (following symbolic refs) to an object id.
///
/// An unborn branch, or a missing repository, fails with `NotFound`.
pub(crate) async fn resolve(fs: &dyn FileSystem, git_dir: &Path, name: &str) -> Result<ObjectId> {
    let mut current = name.to_string();
    for _ in 0..MAX_SYMREF_DEPTH {
        match read_ref(fs, git_dir, &current).await? {
            Some(RefValue::Direct(id)) => return Ok(id),
            Some(RefValue::Symbolic(target)) => {
                validate_ref_name(&target)?;
                current = target;
            }
            None => return Err(fs_errors::not_found(&format!("ref {}", current))),
        }
    }
    Err(Error::corrupt(format!("symbolic ref loop at {}", name)))
}

/// Resolve `HEAD`, mapping "unborn" to `None`.
pub(crate) async fn resolve_head(fs: &dyn FileSystem, git_dir: &Path) -> Result<Option<ObjectId>> {
    match resolve(fs, git_dir, HEAD).await {
        Ok(id) => Ok(Some(id)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// The ref `HEAD` points at (`refs/heads/main`).
pub(crate) async fn head_target(fs: &dyn FileSystem, git_dir: &Path) -> Result<String> {
    match read_ref(fs, git_dir, HEAD).await? {
        Some(RefValue::Symbolic(target)) => {
            validate_ref_name(&target)?;
            Ok(target)
        }
        Some(RefValue::Direct(_)) => Err(Error::invalid(
            "HEAD is detached; check out a branch before committing",
        )),
        None => Err(fs_errors::not_found(HEAD)),
    }
}

pub(crate) async fn write_ref(
    fs: &dyn FileSystem,
    git_dir: &Path,
    name: &str,
    id: &ObjectId,
) -> Result<()> {
    validate_ref_name(name)?;
    let path = git_dir.join(name);
    if let Some(parent) = path.parent() {
        fs.mkdir(parent, true).await?;
    }
    fs.write_file(&path, format!("{}\n", id).as_bytes()).await
}

pub(crate) async fn write_symbolic(
    fs: &dyn FileSystem,
    git_dir: &Path,
    name: &str,
    target: &str,
) -> Result<()> {
    validate_ref_name(target)?;
    fs.write_file(&git_dir.join(name), format!("ref: {}\n", target).as_bytes())
        .await
}
