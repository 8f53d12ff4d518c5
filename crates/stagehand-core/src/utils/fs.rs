use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Directory names never descended into
const SKIPPED_DIRS: &[&str] = &[".git"];

/// Find all files recursively that match a predicate
pub fn find_files<P, F>(path: P, predicate: &F) -> io::Result<Vec<PathBuf>>
where
    P: AsRef<Path>,
    F: Fn(&Path) -> bool + ?Sized,
{
    let mut result = Vec::new();

    if !path.as_ref().exists() {
        return Ok(result);
    }

    if path.as_ref().is_file() {
        if predicate(path.as_ref()) {
            result.push(path.as_ref().to_path_buf());
        }
        return Ok(result);
    }

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let skipped = entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIPPED_DIRS.contains(&name));
            if !skipped {
                let mut sub_results = find_files(&entry_path, predicate)?;
                result.append(&mut sub_results);
            }
        } else if entry_path.is_file() {
            if predicate(&entry_path) {
                result.push(entry_path);
            }
        }
    }

    Ok(result)
}

/// Every file under `root` as a path relative to it, sorted
pub fn relative_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = find_files(root, &|_: &Path| true)?
        .into_iter()
        .filter_map(|path| path.strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort_by_key(|path| to_slash_path(path));
    Ok(files)
}

/// Render a relative path with `/` separators regardless of platform
pub fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether `path` stays inside whatever directory it is joined onto
pub fn is_contained_relative(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
