use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::SelectError;

/// A glob-described collection of source files under a base directory.
///
/// File sets are ephemeral: a task recomputes its set on every invocation,
/// optionally narrowed to files modified since the task's last run.
pub struct FileSet {
    base: Utf8PathBuf,
    patterns: Vec<String>,
}

impl FileSet {
    pub fn new(
        base: impl Into<Utf8PathBuf>,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            base: base.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Base directory against which output-relative paths are computed.
    pub fn base(&self) -> &Utf8Path {
        &self.base
    }

    /// All files matching any of the patterns, sorted and deduplicated.
    pub fn resolve(&self) -> Result<Vec<Utf8PathBuf>, SelectError> {
        let mut files = Vec::new();

        for pattern in &self.patterns {
            for entry in glob::glob(pattern)? {
                let path = Utf8PathBuf::try_from(entry?)?;
                if path.is_file() {
                    files.push(path);
                }
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Like [`FileSet::resolve`], narrowed to files modified after `stamp`.
    /// With no stamp recorded the selection is the full set.
    pub fn resolve_since(
        &self,
        stamp: Option<SystemTime>,
    ) -> Result<Vec<Utf8PathBuf>, SelectError> {
        let files = self.resolve()?;

        Ok(match stamp {
            None => files,
            Some(stamp) => files
                .into_iter()
                .filter(|file| modified_after(file, stamp))
                .collect(),
        })
    }
}

/// Whether `path` was modified strictly after `stamp`. Files whose metadata
/// cannot be read are treated as modified so they are never silently skipped.
pub(crate) fn modified_after(path: &Utf8Path, stamp: SystemTime) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| modified > stamp)
        .unwrap_or(true)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn touch(dir: &Utf8Path, name: &str, contents: &str) -> Utf8PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_resolve_matches_globs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();

        touch(&root, "pages/index.html", "<html></html>");
        touch(&root, "pages/sub/about.html", "<html></html>");
        touch(&root, "pages/readme.txt", "not selected");

        let set = FileSet::new(root.join("pages"), [format!("{root}/pages/**/*.html")]);
        let files = set.resolve().unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension() == Some("html")));
    }

    #[test]
    fn test_second_run_selects_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        touch(&root, "style/main.scss", "body { color: red; }");

        let set = FileSet::new(root.join("style"), [format!("{root}/style/**/*.scss")]);

        // First run has no stamp, everything is selected.
        assert_eq!(set.resolve_since(None).unwrap().len(), 1);

        // A stamp after the write filters everything out.
        let stamp = SystemTime::now() + Duration::from_secs(5);
        assert!(set.resolve_since(Some(stamp)).unwrap().is_empty());
    }

    #[test]
    fn test_modified_file_is_reselected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let kept = touch(&root, "style/_vars.scss", "$accent: teal;");
        touch(&root, "style/main.scss", "body { color: red; }");

        let set = FileSet::new(root.join("style"), [format!("{root}/style/**/*.scss")]);
        let stamp = SystemTime::now() - Duration::from_secs(3600);

        // Both are newer than an hour-old stamp.
        assert_eq!(set.resolve_since(Some(stamp)).unwrap().len(), 2);

        // Exactly the touched file survives a fresh stamp.
        let stamp = SystemTime::now() + Duration::from_secs(5);
        let later = stamp + Duration::from_secs(5);
        fs::OpenOptions::new()
            .write(true)
            .open(&kept)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let files = set.resolve_since(Some(stamp)).unwrap();
        assert_eq!(files, vec![kept]);
    }
}
