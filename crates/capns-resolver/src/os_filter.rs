/// OS artifact files excluded from resolution.
const EXCLUDED_FILES: &[&str] = &[
    ".DS_Store",
    ".localized",
    "Thumbs.db",
    "desktop.ini",
    "ehthumbs.db",
    "Icon\r",
];

/// Directories never traversed during recursive enumeration.
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    "__MACOSX",
    ".Trash",
    ".Trashes",
    ".thumbnails",
    ".Spotlight-V100",
    ".fseventsd",
];

/// Whether a file is a platform artifact that should never become an
/// input.
#[must_use]
pub fn should_exclude_file(file_name: &str) -> bool {
    EXCLUDED_FILES.contains(&file_name) || file_name.starts_with("._")
}

/// Whether a directory should be skipped during recursive enumeration.
#[must_use]
pub fn should_exclude_dir(dir_name: &str) -> bool {
    EXCLUDED_DIRS.contains(&dir_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_artifacts_excluded() {
        assert!(should_exclude_file(".DS_Store"));
        assert!(should_exclude_file("Thumbs.db"));
        assert!(should_exclude_file("._resource-fork"));
        assert!(!should_exclude_file("report.pdf"));
        assert!(!should_exclude_file(".hidden-but-real"));
    }

    #[test]
    fn test_vcs_dirs_excluded() {
        assert!(should_exclude_dir(".git"));
        assert!(should_exclude_dir("__MACOSX"));
        assert!(!should_exclude_dir("src"));
        assert!(!should_exclude_dir("documents"));
    }
}
