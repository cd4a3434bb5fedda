use std::io;
use std::path::Path;

use audit_core::JobId;
use tempfile::TempDir;
use tracing::warn;

/// Scratch directory for one run of one job: `<work_root>/<job_id>-<random>`.
///
/// Removed by [`JobWorkspace::close`] or, failing that, on drop (including
/// unwinding).
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
}

impl JobWorkspace {
    pub fn create(work_root: &Path, job_id: &JobId) -> io::Result<Self> {
        std::fs::create_dir_all(work_root)?;
        let prefix = format!("{}-", sanitize_component(job_id.as_str()));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(work_root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), error = %e, "failed to remove job workspace");
        }
    }
}

/// Directory-safe form of an id or file name.
pub(crate) fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspaces_are_unique_and_removed() {
        let root = tempfile::tempdir().unwrap();
        let id = JobId::from_str("job-1");
        let a = JobWorkspace::create(root.path(), &id).unwrap();
        let b = JobWorkspace::create(root.path(), &id).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().file_name().unwrap().to_string_lossy().starts_with("job-1-"));

        let a_path = a.path().to_path_buf();
        a.close();
        assert!(!a_path.exists());

        let b_path = b.path().to_path_buf();
        drop(b);
        assert!(!b_path.exists());
    }

    #[test]
    fn sanitizes_separators() {
        assert_eq!(sanitize_component("a/b:c\\d"), "a_b_c_d");
    }
}
