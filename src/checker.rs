use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::dir_cache::DirEntryCache;
use crate::fs::DirLister;

/// Fixed prefix on every diagnostic, so hosts can grep for it.
pub const DIAGNOSTIC_PREFIX: &str = "[casecheck]";

/// Result of checking one requested path against on-disk casing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCheck {
    /// The path as requested by the caller.
    pub requested: PathBuf,
    pub status: CheckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    /// Every segment matches an on-disk entry name byte for byte.
    Match,
    /// The path resolves under a case-insensitive comparison, but the
    /// segment at `segment_index` is spelled differently on disk. Only the
    /// first diverging segment is reported.
    Mismatch {
        /// Index of the first diverging segment, root excluded.
        segment_index: usize,
        /// That segment as requested.
        requested_segment: String,
        /// The true on-disk name.
        actual: String,
    },
    /// Some segment doesn't exist even case-insensitively. A genuinely
    /// missing path, not a case error; the caller's resolver deals with it.
    NotFound,
}

impl PathCheck {
    /// The diagnostic for a `Mismatch` result, `None` for the other
    /// statuses.
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        match &self.status {
            CheckStatus::Mismatch {
                requested_segment,
                actual,
                ..
            } => Some(Diagnostic {
                requested: self.requested.clone(),
                requested_segment: requested_segment.clone(),
                actual: actual.clone(),
            }),
            CheckStatus::Match | CheckStatus::NotFound => None,
        }
    }
}

/// A reportable case mismatch. The text names both spellings so the fix is
/// obvious from the message alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub requested: PathBuf,
    pub requested_segment: String,
    pub actual: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{DIAGNOSTIC_PREFIX} `{}` does not match the corresponding path on disk: \
             `{}` is `{}` on disk",
            self.requested.display(),
            self.requested_segment,
            self.actual
        )
    }
}

/// Verifies requested paths against the actual casing on disk.
///
/// This is the entire host seam: a host calls [`check`](Self::check) once per
/// resolved path, [`invalidate`](Self::invalidate) once per filesystem change
/// event, and [`clear`](Self::clear) when starting a fresh build. The checker
/// never aborts anything itself; it only reports.
pub struct CaseChecker<F> {
    cache: DirEntryCache<F>,
}

impl<F: DirLister> CaseChecker<F> {
    pub fn new(fs: F) -> Self {
        Self {
            cache: DirEntryCache::new(fs),
        }
    }

    /// Check `path` against on-disk casing, walking segment by segment from
    /// the root. `path` must be absolute; the caller resolves relative
    /// references first.
    ///
    /// `Err` means a directory along the walk couldn't be listed (not that
    /// it doesn't exist); the caller may retry or skip this path.
    pub async fn check(&self, path: &Path) -> io::Result<PathCheck> {
        let (root, segments) = split_segments(path)?;
        let requested = path.to_path_buf();

        let mut current = root;
        for (segment_index, segment) in segments.iter().enumerate() {
            let Some(entries) = self.cache.get(&current).await? else {
                return Ok(PathCheck {
                    requested,
                    status: CheckStatus::NotFound,
                });
            };
            if entries.contains(segment) {
                current.push(segment);
                continue;
            }
            let status = match case_insensitive_lookup(&entries, segment) {
                Some(actual) => CheckStatus::Mismatch {
                    segment_index,
                    requested_segment: segment.clone(),
                    actual: actual.clone(),
                },
                None => CheckStatus::NotFound,
            };
            return Ok(PathCheck { requested, status });
        }

        Ok(PathCheck {
            requested,
            status: CheckStatus::Match,
        })
    }

    /// A filesystem change at `path`: marks the affected directory records
    /// stale so the next check reloads them.
    pub fn invalidate(&self, path: &Path) {
        self.cache.invalidate(path);
    }

    /// Start of a fresh, non-incremental build: drops all cached listings.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

/// Split an absolute path into its root (prefix and separator, never
/// case-checked) and the ordered child segments. `.` and `..` are resolved
/// lexically here, so they are never mismatch candidates; `..` above the
/// root stays at the root.
fn split_segments(path: &Path) -> io::Result<(PathBuf, Vec<String>)> {
    let mut root = PathBuf::new();
    let mut segments: Vec<String> = Vec::new();
    let mut anchored = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) => root.push(component.as_os_str()),
            Component::RootDir => {
                root.push(component.as_os_str());
                anchored = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                segments.pop();
            }
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Path is not valid UTF-8: {path:?}"),
                    )
                })?;
                segments.push(name.to_owned());
            }
        }
    }
    if !anchored {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Path is not absolute: {path:?}"),
        ));
    }
    Ok((root, segments))
}

/// Find the entry that `segment` resolves to on a case-insensitive
/// filesystem: equal after Unicode uppercasing, but not byte-equal.
///
/// Uppercasing also conflates some non-casing byte differences (ligatures
/// and such); those are reported as mismatches too rather than silently
/// accepted, and the caller can apply its own exemptions.
fn case_insensitive_lookup<'a>(entries: &'a BTreeSet<String>, segment: &str) -> Option<&'a String> {
    let segment_upper = segment.to_uppercase();
    entries
        .iter()
        .find(|name| name.to_uppercase() == segment_upper)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fs::RealFs;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// Fake filesystem mapping directory paths to entry names.
    #[derive(Default)]
    struct FakeFs {
        dirs: Mutex<BTreeMap<PathBuf, BTreeSet<String>>>,
    }

    impl FakeFs {
        fn set_dir(&self, dir: &str, names: &[&str]) {
            self.dirs.lock().unwrap().insert(
                PathBuf::from(dir),
                names.iter().map(|n| (*n).to_owned()).collect(),
            );
        }

        fn remove_dir(&self, dir: &str) {
            self.dirs.lock().unwrap().remove(Path::new(dir));
        }
    }

    impl DirLister for FakeFs {
        async fn list_dir(&self, dir: &Path) -> io::Result<Option<BTreeSet<String>>> {
            Ok(self.dirs.lock().unwrap().get(dir).cloned())
        }
    }

    fn checker() -> (CaseChecker<Arc<FakeFs>>, Arc<FakeFs>) {
        let fs = Arc::new(FakeFs::default());
        fs.set_dir("/", &["src", "nested"]);
        fs.set_dir("/src", &["existingTestFile.js", "file#1.js"]);
        fs.set_dir("/nested", &["foo.js"]);
        (CaseChecker::new(Arc::clone(&fs)), fs)
    }

    async fn status(checker: &CaseChecker<Arc<FakeFs>>, path: &str) -> CheckStatus {
        checker.check(Path::new(path)).await.unwrap().status
    }

    #[tokio::test]
    async fn exact_path_matches() {
        let (checker, _fs) = checker();
        assert_eq!(
            status(&checker, "/src/existingTestFile.js").await,
            CheckStatus::Match
        );
    }

    #[tokio::test]
    async fn wrong_case_in_file_name_is_a_mismatch() {
        let (checker, _fs) = checker();
        assert_eq!(
            status(&checker, "/src/ExistingTestFile.js").await,
            CheckStatus::Mismatch {
                segment_index: 1,
                requested_segment: "ExistingTestFile.js".to_owned(),
                actual: "existingTestFile.js".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn first_diverging_segment_wins() {
        let (checker, _fs) = checker();
        // The directory name already diverges; the file name (which also
        // diverges) must not be reported, and it doesn't even need to exist.
        assert_eq!(
            status(&checker, "/Nested/Foo.js").await,
            CheckStatus::Mismatch {
                segment_index: 0,
                requested_segment: "Nested".to_owned(),
                actual: "nested".to_owned(),
            }
        );
        assert_eq!(
            status(&checker, "/Nested/bar.js").await,
            CheckStatus::Mismatch {
                segment_index: 0,
                requested_segment: "Nested".to_owned(),
                actual: "nested".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn genuinely_missing_path_is_not_found() {
        let (checker, _fs) = checker();
        assert_eq!(status(&checker, "/src/nope.js").await, CheckStatus::NotFound);
        assert_eq!(
            status(&checker, "/no/such/file.js").await,
            CheckStatus::NotFound
        );
    }

    #[tokio::test]
    async fn dot_and_dotdot_are_resolved_before_the_walk() {
        let (checker, _fs) = checker();
        assert_eq!(
            status(&checker, "/src/./tmp/../existingTestFile.js").await,
            CheckStatus::Match
        );
        // `..` above the root stays at the root.
        assert_eq!(
            status(&checker, "/../src/existingTestFile.js").await,
            CheckStatus::Match
        );
    }

    #[tokio::test]
    async fn hash_is_an_ordinary_file_name_character() {
        let (checker, _fs) = checker();
        assert_eq!(status(&checker, "/src/file#1.js").await, CheckStatus::Match);
        assert_eq!(
            status(&checker, "/src/File#1.js").await,
            CheckStatus::Mismatch {
                segment_index: 1,
                requested_segment: "File#1.js".to_owned(),
                actual: "file#1.js".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn non_ascii_case_differences_are_caught() {
        let fs = Arc::new(FakeFs::default());
        fs.set_dir("/", &["docs"]);
        fs.set_dir("/docs", &["résumé.txt"]);
        let checker = CaseChecker::new(fs);
        assert_eq!(
            status(&checker, "/docs/RÉSUMÉ.TXT").await,
            CheckStatus::Mismatch {
                segment_index: 1,
                requested_segment: "RÉSUMÉ.TXT".to_owned(),
                actual: "résumé.txt".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn relative_path_is_rejected() {
        let (checker, _fs) = checker();
        let err = checker
            .check(Path::new("src/existingTestFile.js"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn deleting_a_directory_turns_match_into_not_found() {
        let (checker, fs) = checker();
        assert_eq!(
            status(&checker, "/src/existingTestFile.js").await,
            CheckStatus::Match
        );

        fs.remove_dir("/src");
        checker.invalidate(Path::new("/src"));
        assert_eq!(
            status(&checker, "/src/existingTestFile.js").await,
            CheckStatus::NotFound
        );
    }

    #[tokio::test]
    async fn clear_picks_up_out_of_band_changes() {
        let (checker, fs) = checker();
        assert_eq!(
            status(&checker, "/src/existingTestFile.js").await,
            CheckStatus::Match
        );

        // Renamed with no invalidation delivered, as happens between
        // separate builds.
        fs.set_dir("/src", &["ExistingTestFile.js"]);
        checker.clear();
        assert_eq!(
            status(&checker, "/src/existingTestFile.js").await,
            CheckStatus::Mismatch {
                segment_index: 1,
                requested_segment: "existingTestFile.js".to_owned(),
                actual: "ExistingTestFile.js".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn diagnostic_names_both_spellings() {
        let (checker, _fs) = checker();
        let check = checker
            .check(Path::new("/src/ExistingTestFile.js"))
            .await
            .unwrap();
        let diagnostic = check.diagnostic().unwrap();
        let text = diagnostic.to_string();
        assert!(text.starts_with(DIAGNOSTIC_PREFIX));
        assert!(text.contains("/src/ExistingTestFile.js"));
        assert!(text.contains("`existingTestFile.js` on disk"));

        let clean = checker
            .check(Path::new("/src/existingTestFile.js"))
            .await
            .unwrap();
        assert!(clean.diagnostic().is_none());
    }

    #[test]
    fn split_segments_handles_roots_and_dots() {
        let (root, segments) = split_segments(Path::new("/a/./b/../c")).unwrap();
        assert_eq!(root, PathBuf::from("/"));
        assert_eq!(segments, ["a", "c"]);

        let (root, segments) = split_segments(Path::new("/")).unwrap();
        assert_eq!(root, PathBuf::from("/"));
        assert!(segments.is_empty());

        assert!(split_segments(Path::new("relative/path")).is_err());
    }

    // End-to-end against the real filesystem, including the symlink policy:
    // a link's own name is case-checked, its target is not resolved.
    #[tokio::test]
    async fn real_filesystem_walk() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir(root.join("Components")).unwrap();
        std::fs::write(root.join("Components/Button.js"), "").unwrap();

        let checker = CaseChecker::new(RealFs);
        assert_eq!(
            checker
                .check(&root.join("Components/Button.js"))
                .await
                .unwrap()
                .status,
            CheckStatus::Match
        );
        let status = checker
            .check(&root.join("components/Button.js"))
            .await
            .unwrap()
            .status;
        assert!(matches!(
            status,
            CheckStatus::Mismatch { ref actual, .. } if actual == "Components"
        ));

        // Deletion must surface on the next check once invalidated.
        std::fs::remove_file(root.join("Components/Button.js")).unwrap();
        std::fs::remove_dir(root.join("Components")).unwrap();
        checker.invalidate(&root.join("Components"));
        assert_eq!(
            checker
                .check(&root.join("Components/Button.js"))
                .await
                .unwrap()
                .status,
            CheckStatus::NotFound
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_name_is_checked_not_its_target() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir(root.join("target")).unwrap();
        std::fs::write(root.join("target/mod.js"), "").unwrap();
        std::os::unix::fs::symlink(root.join("target"), root.join("Linked")).unwrap();

        let checker = CaseChecker::new(RealFs);
        assert_eq!(
            checker
                .check(&root.join("Linked/mod.js"))
                .await
                .unwrap()
                .status,
            CheckStatus::Match
        );
        // Wrong casing of the link name itself is still a mismatch.
        let status = checker
            .check(&root.join("linked/mod.js"))
            .await
            .unwrap()
            .status;
        assert!(matches!(
            status,
            CheckStatus::Mismatch { ref actual, .. } if actual == "Linked"
        ));
        // Entries inside the link are listed through it, by their own names.
        let status = checker
            .check(&root.join("Linked/Mod.js"))
            .await
            .unwrap()
            .status;
        assert!(matches!(
            status,
            CheckStatus::Mismatch { ref actual, .. } if actual == "mod.js"
        ));
    }
}
