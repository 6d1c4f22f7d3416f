use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use capns_plan::Cardinality;
use capns_urn::MediaUrn;

use crate::adapter::{detect_media, ContentStructure};
use crate::error::ResolveError;
use crate::os_filter::{should_exclude_dir, should_exclude_file};

/// How much of a file content inspection reads.
const INSPECTION_LIMIT: usize = 64 * 1024;

/// A single resolved file with its detected media type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFile {
    pub path: Utf8PathBuf,
    pub media_urn: MediaUrn,
    pub size_bytes: u64,
    pub content_structure: ContentStructure,
}

impl ResolvedFile {
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.content_structure.is_list()
    }

    #[must_use]
    pub fn is_record(&self) -> bool {
        self.content_structure.is_record()
    }
}

/// The result of resolving input paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedInputSet {
    pub files: Vec<ResolvedFile>,
    /// Aggregate shape of the set: more than one file, or one list-shaped
    /// file, makes a sequence.
    pub cardinality: Cardinality,
    /// The shared media URN when every file detected the same type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_media: Option<MediaUrn>,
}

impl ResolvedInputSet {
    fn from_files(files: Vec<ResolvedFile>) -> Self {
        let cardinality = match files.as_slice() {
            [single] if !single.is_list() => Cardinality::Single,
            _ => Cardinality::Sequence,
        };
        let common_media = files.split_first().and_then(|(first, rest)| {
            rest.iter()
                .all(|f| f.media_urn == first.media_urn)
                .then(|| first.media_urn.clone())
        });
        Self {
            files,
            cardinality,
            common_media,
        }
    }

    #[must_use]
    pub fn is_homogeneous(&self) -> bool {
        self.common_media.is_some()
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// Whether a path contains glob metacharacters.
#[must_use]
pub fn is_glob_pattern(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Expand a glob pattern to matching file paths, sorted.
pub fn expand_glob(pattern: &str) -> Result<Vec<Utf8PathBuf>, ResolveError> {
    let glob = Glob::new(pattern).map_err(|e| ResolveError::InvalidGlob {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    let matcher = GlobSetBuilder::new()
        .add(glob)
        .build()
        .map_err(|e| ResolveError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

    // Walk from the literal prefix of the pattern.
    let base = literal_prefix(pattern);
    let base = if base.as_str().is_empty() {
        Utf8PathBuf::from(".")
    } else {
        base
    };

    let mut matches = Vec::new();
    let mut visited = BTreeSet::new();
    walk(&base, &mut visited, &mut |file| {
        if matcher.is_match(file.as_std_path()) {
            matches.push(file.to_owned());
        }
        Ok(())
    })?;
    matches.sort();
    Ok(matches)
}

/// The leading glob-free directory components of a pattern.
fn literal_prefix(pattern: &str) -> Utf8PathBuf {
    let mut prefix = Utf8PathBuf::new();
    for component in Utf8Path::new(pattern).components() {
        let text = component.as_str();
        if is_glob_pattern(text) {
            break;
        }
        prefix.push(text);
    }
    // The last component may be a file name, not a directory.
    if prefix.as_str() == pattern {
        prefix.pop();
    }
    prefix
}

fn walk(
    dir: &Utf8Path,
    visited: &mut BTreeSet<Utf8PathBuf>,
    emit: &mut dyn FnMut(&Utf8Path) -> Result<(), ResolveError>,
) -> Result<(), ResolveError> {
    let canonical = dir
        .canonicalize_utf8()
        .map_err(|e| io_error(dir.as_str(), e))?;
    if !visited.insert(canonical) {
        return Err(ResolveError::SymlinkCycle {
            path: dir.to_string(),
        });
    }

    let entries = dir.read_dir_utf8().map_err(|e| io_error(dir.as_str(), e))?;
    let mut paths: Vec<Utf8PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dir.as_str(), e))?;
        paths.push(entry.into_path());
    }
    paths.sort();

    for path in paths {
        let name = path.file_name().unwrap_or_default();
        let file_type = path
            .symlink_metadata()
            .map_err(|e| io_error(path.as_str(), e))?;
        if file_type.is_dir() || (file_type.is_symlink() && path.is_dir()) {
            if should_exclude_dir(name) {
                debug!(%path, "skipping excluded directory");
                continue;
            }
            walk(&path, visited, emit)?;
        } else if path.is_file() {
            if should_exclude_file(name) {
                debug!(%path, "skipping OS artifact");
                continue;
            }
            emit(&path)?;
        }
    }
    Ok(())
}

fn io_error(path: &str, source: std::io::Error) -> ResolveError {
    match source.kind() {
        std::io::ErrorKind::NotFound => ResolveError::NotFound {
            path: path.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => ResolveError::PermissionDenied {
            path: path.to_string(),
        },
        _ => ResolveError::Io {
            path: path.to_string(),
            source,
        },
    }
}

/// Detect a single file's media type and structure.
pub fn detect_file(path: &Utf8Path) -> Result<ResolvedFile, ResolveError> {
    let metadata = std::fs::metadata(path).map_err(|e| io_error(path.as_str(), e))?;
    if !metadata.is_file() {
        return Err(ResolveError::NotAFile {
            path: path.to_string(),
        });
    }

    let content = read_prefix(path, INSPECTION_LIMIT)?;
    let (media_urn, content_structure) =
        detect_media(path.as_str(), path.extension(), &content)?;
    Ok(ResolvedFile {
        path: path.to_owned(),
        media_urn,
        size_bytes: metadata.len(),
        content_structure,
    })
}

fn read_prefix(path: &Utf8Path, limit: usize) -> Result<Vec<u8>, ResolveError> {
    use std::io::Read;
    let file = std::fs::File::open(path).map_err(|e| io_error(path.as_str(), e))?;
    let mut buffer = Vec::with_capacity(limit.min(8 * 1024));
    file.take(limit as u64)
        .read_to_end(&mut buffer)
        .map_err(|e| io_error(path.as_str(), e))?;
    Ok(buffer)
}

/// Resolve one input path (file, directory, or glob) to typed files.
pub fn resolve_path(path: &str) -> Result<ResolvedInputSet, ResolveError> {
    resolve_paths(&[path.to_string()])
}

/// Resolve a mixed list of paths to a flat set of typed files.
pub fn resolve_paths(paths: &[String]) -> Result<ResolvedInputSet, ResolveError> {
    if paths.is_empty() {
        return Err(ResolveError::EmptyInput);
    }

    let mut files = Vec::new();
    for raw in paths {
        if is_glob_pattern(raw) {
            for matched in expand_glob(raw)? {
                files.push(detect_file(&matched)?);
            }
            continue;
        }

        let path = Utf8PathBuf::from(raw);
        let metadata = std::fs::metadata(&path).map_err(|e| io_error(raw, e))?;
        if metadata.is_dir() {
            let mut visited = BTreeSet::new();
            let mut collected: Vec<Utf8PathBuf> = Vec::new();
            walk(&path, &mut visited, &mut |file| {
                collected.push(file.to_owned());
                Ok(())
            })?;
            for file in collected {
                files.push(detect_file(&file)?);
            }
        } else {
            files.push(detect_file(&path)?);
        }
    }

    if files.is_empty() {
        return Err(ResolveError::NoFilesResolved);
    }
    debug!(count = files.len(), "resolved input files");
    Ok(ResolvedInputSet::from_files(files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
    }

    #[test]
    fn test_detect_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        fs::write(&path, b"%PDF-1.7 content").unwrap();

        let resolved = detect_file(&utf8(&path)).unwrap();
        assert_eq!(resolved.media_urn.to_string(), "media:pdf");
        assert_eq!(resolved.size_bytes, 16);
        assert!(!resolved.is_list());
    }

    #[test]
    fn test_not_found_and_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = utf8(&dir.path().join("missing.pdf"));
        assert!(matches!(
            detect_file(&missing).unwrap_err(),
            ResolveError::NotFound { .. }
        ));
        assert!(matches!(
            detect_file(&utf8(dir.path())).unwrap_err(),
            ResolveError::NotAFile { .. }
        ));
    }

    #[test]
    fn test_resolve_directory_filters_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"one").unwrap();
        fs::write(dir.path().join("b.txt"), b"two").unwrap();
        fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("config"), b"vcs").unwrap();

        let set = resolve_path(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(set.files.len(), 2);
        assert_eq!(set.cardinality, Cardinality::Sequence);
        assert!(set.is_homogeneous());
        assert_eq!(set.total_size(), 6);
    }

    #[test]
    fn test_single_file_set_is_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("only.md");
        fs::write(&path, b"# heading").unwrap();
        let set = resolve_path(path.to_str().unwrap()).unwrap();
        assert_eq!(set.cardinality, Cardinality::Single);
        assert_eq!(
            set.common_media.as_ref().unwrap().to_string(),
            "media:markdown;textable"
        );
    }

    #[test]
    fn test_list_shaped_file_is_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        fs::write(&path, br#"[{"a": 1}, {"a": 2}]"#).unwrap();
        let set = resolve_path(path.to_str().unwrap()).unwrap();
        assert_eq!(set.cardinality, Cardinality::Sequence);
        assert!(set.files[0].is_list());
        assert!(set.files[0].is_record());
    }

    #[test]
    fn test_glob_expansion() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.txt"), b"1").unwrap();
        fs::write(dir.path().join("two.txt"), b"2").unwrap();
        fs::write(dir.path().join("other.md"), b"3").unwrap();

        let pattern = format!("{}/*.txt", dir.path().to_str().unwrap());
        assert!(is_glob_pattern(&pattern));
        let matches = expand_glob(&pattern).unwrap();
        assert_eq!(matches.len(), 2);

        let set = resolve_path(&pattern).unwrap();
        assert_eq!(set.files.len(), 2);
    }

    #[test]
    fn test_invalid_glob() {
        let err = expand_glob("[unclosed").unwrap_err();
        assert!(matches!(err, ResolveError::InvalidGlob { .. }));
    }

    #[test]
    fn test_empty_input_and_no_files() {
        assert!(matches!(
            resolve_paths(&[]).unwrap_err(),
            ResolveError::EmptyInput
        ));

        let dir = tempfile::tempdir().unwrap();
        let err = resolve_path(dir.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ResolveError::NoFilesResolved));
    }

    #[test]
    fn test_mixed_media_is_not_homogeneous() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"text").unwrap();
        fs::write(dir.path().join("b.pdf"), b"%PDF-1.4").unwrap();
        let set = resolve_path(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(set.files.len(), 2);
        assert!(!set.is_homogeneous());
        assert!(set.common_media.is_none());
    }
}
