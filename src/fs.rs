use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use log::debug;

/// Directory listing capability. All filesystem access goes through this
/// trait so a host can instrument or virtualize it, and tests can count and
/// fail listings deterministically.
pub trait DirLister: Send + Sync {
    /// List the exact on-disk names of the children of `dir`, case preserved.
    ///
    /// Returns `Ok(None)` if `dir` does not exist or is not a directory.
    /// Other I/O failures (permissions, device errors) are returned as `Err`
    /// so callers can tell a missing directory from an unreadable one.
    async fn list_dir(&self, dir: &Path) -> io::Result<Option<BTreeSet<String>>>;
}

impl<F: DirLister> DirLister for Arc<F> {
    async fn list_dir(&self, dir: &Path) -> io::Result<Option<BTreeSet<String>>> {
        F::list_dir(self, dir).await
    }
}

/// The real filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealFs;

impl DirLister for RealFs {
    async fn list_dir(&self, dir: &Path) -> io::Result<Option<BTreeSet<String>>> {
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(read_dir) => read_dir,
            Err(err) if is_absent(&err) => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut names = BTreeSet::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => match entry.file_name().into_string() {
                    Ok(name) => {
                        names.insert(name);
                    }
                    // Case comparison works on UTF-8 strings, so names that
                    // aren't UTF-8 can't be checked anyway.
                    Err(name) => debug!("Skipping non-UTF-8 directory entry: {name:?}"),
                },
                Ok(None) => break,
                // The directory can disappear while we're listing it.
                Err(err) if is_absent(&err) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
        Ok(Some(names))
    }
}

fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn lists_exact_names() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("CamelCase.js"), "").unwrap();
        std::fs::write(tmp.path().join("lower.js"), "").unwrap();
        std::fs::create_dir(tmp.path().join("Subdir")).unwrap();

        let names = RealFs.list_dir(tmp.path()).await.unwrap().unwrap();
        assert_eq!(
            names,
            BTreeSet::from([
                "CamelCase.js".to_owned(),
                "lower.js".to_owned(),
                "Subdir".to_owned()
            ])
        );
    }

    #[tokio::test]
    async fn missing_directory_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let listed = RealFs.list_dir(&tmp.path().join("nope")).await.unwrap();
        assert!(listed.is_none());
    }

    #[tokio::test]
    async fn file_is_not_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        let listed = RealFs.list_dir(&file).await.unwrap();
        assert!(listed.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_is_listed_by_its_own_name() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("Target")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("Target"), tmp.path().join("Linked")).unwrap();

        let names = RealFs.list_dir(tmp.path()).await.unwrap().unwrap();
        assert!(names.contains("Linked"));
        assert!(names.contains("Target"));
    }
}
