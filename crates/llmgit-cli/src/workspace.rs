//! Host directory collection for `llmgit push`

use std::path::{Path, PathBuf};

use llmgit::{FileDescriptor, FileSystem, RealFs};

/// Directories never copied into the workspace.
const SKIPPED_DIRS: &[&str] = &[".git"];

/// Collect every UTF-8 file under `dir` as a descriptor relative to `dir`.
///
/// Binary files are skipped with a warning. Output is sorted by path.
pub async fn collect_files(dir: &Path) -> llmgit::Result<Vec<FileDescriptor>> {
    let fs = RealFs::new(dir);
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let absolute = Path::new("/").join(&relative);
        for entry in fs.read_dir(&absolute).await? {
            let child = relative.join(&entry.name);
            if entry.metadata.is_dir() {
                if !SKIPPED_DIRS.contains(&entry.name.as_str()) {
                    pending.push(child);
                }
                continue;
            }

            let bytes = fs.read_file(&absolute.join(&entry.name)).await?;
            let path = child.to_string_lossy().replace('\\', "/");
            match String::from_utf8(bytes) {
                Ok(content) => files.push(FileDescriptor::new(path, content)),
                Err(_) => tracing::warn!(path = %path, "Skipping non-UTF-8 file"),
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
