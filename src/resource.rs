use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};
use url::Url;

use crate::error::LoadError;

/// Environment variable holding the resource roots, in the platform's
/// path-list syntax (`:`-separated on Unix).
pub const RESOURCES_ENV: &str = "RUSTY_DBLP_RESOURCES";

/// Name of the directory next to the executable that holds bundled files.
pub const BUNDLE_DIR: &str = "resources";

// ---------------------------------------------------------------------------
// ResourceName
// ---------------------------------------------------------------------------

/// Logical name of a bundled file, e.g. `sample.xml` or `data/dblp.dtd`.
/// A leading `/` is allowed and means the same as none. A `file:` URL names
/// a file outside the bundle. Only `file:` names and names of the form
/// `scheme://...` are read as URLs, so `ab:notes.xml` is an ordinary file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(name: impl Into<String>) -> Self {
        ResourceName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceName {
    fn from(name: &str) -> Self {
        ResourceName(name.to_string())
    }
}

impl From<String> for ResourceName {
    fn from(name: String) -> Self {
        ResourceName(name)
    }
}

impl From<&String> for ResourceName {
    fn from(name: &String) -> Self {
        ResourceName(name.clone())
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a name points before any filesystem access.
enum Target {
    /// Relative path to look up under each root.
    Bundled(PathBuf),
    /// Absolute path taken from a `file:` URL.
    External(PathBuf),
}

// ---------------------------------------------------------------------------
// ResourceLocator
// ---------------------------------------------------------------------------

/// Resolves resource names against an ordered list of roots. The first root
/// containing the file wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLocator {
    roots: Vec<PathBuf>,
}

impl ResourceLocator {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        ResourceLocator {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// Roots from [`RESOURCES_ENV`] when set, otherwise the bundle directory
    /// next to the running executable followed by the executable's directory.
    pub fn from_env() -> Self {
        Self::from_search_path(env::var_os(RESOURCES_ENV))
    }

    fn from_search_path(search_path: Option<OsString>) -> Self {
        if let Some(paths) = search_path.filter(|p| !p.is_empty()) {
            return Self::new(env::split_paths(&paths));
        }
        match env::current_exe() {
            Ok(exe) => {
                let dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
                Self::new([dir.join(BUNDLE_DIR), dir])
            }
            Err(e) => {
                warn!("cannot locate the running executable ({e}); no resource roots configured");
                Self::default()
            }
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Turn a resource name into an absolute, canonical path to an existing
    /// file.
    pub fn resolve(&self, name: &ResourceName) -> Result<PathBuf, LoadError> {
        let failure = |reason: String| LoadError::PathResolutionFailure {
            name: name.to_string(),
            reason,
        };

        match target_of(name.as_str()).map_err(failure)? {
            Target::External(path) => match probe(&path) {
                Ok(Some(found)) => Ok(found),
                Ok(None) => Err(LoadError::ResourceNotFound {
                    name: name.to_string(),
                    searched: vec![path],
                }),
                Err(e) => Err(failure(format!("{}: {e}", path.display()))),
            },
            Target::Bundled(relative) => {
                for root in &self.roots {
                    let candidate = root.join(&relative);
                    match probe(&candidate) {
                        Ok(Some(found)) => {
                            debug!("resolved `{name}` to {}", found.display());
                            return Ok(found);
                        }
                        Ok(None) => continue,
                        Err(e) => return Err(failure(format!("{}: {e}", candidate.display()))),
                    }
                }
                Err(LoadError::ResourceNotFound {
                    name: name.to_string(),
                    searched: self.roots.clone(),
                })
            }
        }
    }
}

/// Classify a name without touching the filesystem.
fn target_of(name: &str) -> Result<Target, String> {
    if name.trim().is_empty() {
        return Err("empty resource name".to_string());
    }

    if looks_like_url(name) {
        let url = Url::parse(name).map_err(|e| format!("invalid URL: {e}"))?;
        if url.scheme() != "file" {
            return Err(format!("unsupported URL scheme `{}`", url.scheme()));
        }
        return url
            .to_file_path()
            .map(Target::External)
            .map_err(|()| format!("`{url}` is not a local file URL"));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(name.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err("name escapes the resource root".to_string());
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute paths are not resource names".to_string());
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err("name does not denote a file".to_string());
    }
    Ok(Target::Bundled(relative))
}

/// `file:...` or `scheme://...`. Single-letter schemes are Windows drive
/// letters.
fn looks_like_url(name: &str) -> bool {
    let Some((scheme, rest)) = name.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    let is_scheme = scheme.len() > 1
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    is_scheme && (scheme.eq_ignore_ascii_case("file") || rest.starts_with("//"))
}

/// `Ok(None)` when nothing usable is at `path` (missing or a directory).
fn probe(path: &Path) -> io::Result<Option<PathBuf>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => fs::canonicalize(path).map(Some),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bundle(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "x").unwrap();
        }
        dir
    }

    #[test]
    fn test_resolves_relative_and_rooted_names() {
        let dir = bundle(&["sample.xml", "data/sample.dtd"]);
        let locator = ResourceLocator::new([dir.path()]);
        let expected = fs::canonicalize(dir.path().join("data/sample.dtd")).unwrap();

        assert_eq!(locator.resolve(&"data/sample.dtd".into()).unwrap(), expected);
        assert_eq!(locator.resolve(&"/data/sample.dtd".into()).unwrap(), expected);
        assert_eq!(locator.resolve(&"./data/../data/sample.dtd".into()).unwrap(), expected);
        assert!(locator.resolve(&"sample.xml".into()).unwrap().is_absolute());
    }

    #[test]
    fn test_first_root_wins() {
        let first = bundle(&["a.xml"]);
        let second = bundle(&["a.xml", "b.xml"]);
        let locator = ResourceLocator::new([first.path(), second.path()]);

        assert!(locator.resolve(&"a.xml".into()).unwrap().starts_with(fs::canonicalize(first.path()).unwrap()));
        assert!(locator.resolve(&"b.xml".into()).unwrap().starts_with(fs::canonicalize(second.path()).unwrap()));
    }

    #[test]
    fn test_missing_and_directory_are_not_found() {
        let dir = bundle(&["data/sample.dtd"]);
        let locator = ResourceLocator::new([dir.path()]);

        for name in ["missing.xml", "data"] {
            match locator.resolve(&name.into()) {
                Err(LoadError::ResourceNotFound { name: n, searched }) => {
                    assert_eq!(n, name);
                    assert_eq!(searched, vec![dir.path().to_path_buf()]);
                }
                other => panic!("expected ResourceNotFound for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_no_roots_means_not_found() {
        let locator = ResourceLocator::default();
        assert!(matches!(
            locator.resolve(&"sample.xml".into()),
            Err(LoadError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_unresolvable_names() {
        let dir = bundle(&["sample.xml"]);
        let locator = ResourceLocator::new([dir.path()]);

        for name in ["", "   ", "../secret.xml", "a/../../b.xml", "/", "http://example.org/dblp.xml"] {
            assert!(
                matches!(
                    locator.resolve(&name.into()),
                    Err(LoadError::PathResolutionFailure { .. })
                ),
                "expected PathResolutionFailure for {name:?}"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_colon_in_file_name_is_not_a_scheme() {
        let dir = bundle(&["ab:notes.xml", "c.xml"]);
        let locator = ResourceLocator::new([dir.path()]);
        let expected = fs::canonicalize(dir.path().join("ab:notes.xml")).unwrap();

        assert_eq!(locator.resolve(&"ab:notes.xml".into()).unwrap(), expected);
        assert!(matches!(
            locator.resolve(&"mailto:c.xml".into()),
            Err(LoadError::ResourceNotFound { .. })
        ));
        assert!(matches!(
            locator.resolve(&"ftp://example.org/c.xml".into()),
            Err(LoadError::PathResolutionFailure { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_urls() {
        let dir = bundle(&["sample.xml"]);
        let locator = ResourceLocator::default();

        let url = Url::from_file_path(dir.path().join("sample.xml")).unwrap();
        assert!(locator.resolve(&url.as_str().into()).is_ok());

        let missing = Url::from_file_path(dir.path().join("gone.xml")).unwrap();
        assert!(matches!(
            locator.resolve(&missing.as_str().into()),
            Err(LoadError::ResourceNotFound { .. })
        ));

        assert!(matches!(
            locator.resolve(&"file://remote-host/share/dblp.xml".into()),
            Err(LoadError::PathResolutionFailure { .. })
        ));
    }

    #[test]
    fn test_roots_from_search_path() {
        let joined = env::join_paths(["/opt/a", "/opt/b"]).unwrap();
        let locator = ResourceLocator::from_search_path(Some(joined));
        assert_eq!(locator.roots(), &[PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]);

        let fallback = ResourceLocator::from_search_path(Some(OsString::new()));
        assert_eq!(fallback.roots().len(), 2);
        assert!(fallback.roots()[0].ends_with(BUNDLE_DIR));
    }
}
