use std::path::{Component, Path, PathBuf};

use tracing::debug;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Debug)]
pub enum SandboxError {
    /// The requested key would resolve outside the sandbox root
    PathEscape(String),
    /// Nothing is stored under the requested key
    MissingObject(PathBuf),
    IOError(std::io::Error),
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxError::PathEscape(key) => write!(f, "path '{}' escapes the sandbox root", key),
            SandboxError::MissingObject(path) => write!(f, "no mock object at {}", path.display()),
            SandboxError::IOError(e) => write!(f, "sandbox io error: {}", e),
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<std::io::Error> for SandboxError {
    fn from(value: std::io::Error) -> Self {
        SandboxError::IOError(value)
    }
}

///
/// A directory tree that only hands out paths beneath its root.
/// Used by the dry-run providers in place of real remote storage
///
#[derive(Clone, Debug)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    ///
    /// Resolves `key` beneath the root. Absolute keys and any `..` segment
    /// are rejected outright rather than normalized
    ///
    pub fn resolve(&self, key: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        let mut depth = 0;
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::PathEscape(key.to_string()));
                }
            }
        }
        if depth == 0 || !resolved.starts_with(&self.root) {
            return Err(SandboxError::PathEscape(key.to_string()));
        }
        Ok(resolved)
    }

    ///
    /// Copies `source` into the sandbox under `key`, returning the stored path
    ///
    pub async fn store(&self, source: &Path, key: &str) -> Result<PathBuf> {
        let target = self.resolve(key)?;
        tokio::fs::create_dir_all(&self.root).await?;
        self.ensure_contained(key, &target).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &target).await?;
        debug!(key, path = %target.display(), "stored mock object");
        Ok(target)
    }

    ///
    /// Copies the object stored under `key` to `output`
    ///
    pub async fn fetch(&self, key: &str, output: &Path) -> Result<()> {
        let source = self.resolve(key)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(SandboxError::MissingObject(source));
        }
        self.ensure_contained(key, &source).await?;
        tokio::fs::copy(&source, output).await?;
        debug!(key, path = %source.display(), "fetched mock object");
        Ok(())
    }

    ///
    /// Follows symlinks from the deepest part of `path` that exists and fails
    /// unless the real location is still beneath the real root. A dangling
    /// link counts as an escape
    ///
    async fn ensure_contained(&self, key: &str, path: &Path) -> Result<()> {
        let root = tokio::fs::canonicalize(&self.root).await?;
        let mut existing = path;
        while tokio::fs::symlink_metadata(existing).await.is_err() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => return Err(SandboxError::PathEscape(key.to_string())),
            }
        }
        let real = match tokio::fs::canonicalize(existing).await {
            Ok(real) => real,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::PathEscape(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if !real.starts_with(&root) {
            return Err(SandboxError::PathEscape(key.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{Sandbox, SandboxError};

    #[test]
    fn test_resolve_stays_under_root() {
        let sandbox = Sandbox::new("/srv/mock");
        assert_eq!(sandbox.resolve("a/b/c.enc").unwrap(), std::path::PathBuf::from("/srv/mock/a/b/c.enc"));
        assert_eq!(sandbox.resolve("./a.enc").unwrap(), std::path::PathBuf::from("/srv/mock/a.enc"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let sandbox = Sandbox::new("/srv/mock");
        for key in ["../escape", "a/../../escape", "a/../b", "/etc/passwd", "", "."] {
            assert!(matches!(sandbox.resolve(key), Err(SandboxError::PathEscape(_))), "{}", key);
        }
    }

    #[tokio::test]
    async fn test_store_then_fetch() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path().join("root"));
        let source = dir.path().join("src.bin");
        std::fs::write(&source, b"payload").unwrap();

        let stored = sandbox.store(&source, "x/y/obj.enc").await.unwrap();
        assert!(stored.starts_with(sandbox.root()));

        let out = dir.path().join("out.bin");
        sandbox.fetch("x/y/obj.enc", &out).await.unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_fetch_missing_object() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path());
        let result = sandbox.fetch("nope.enc", &dir.path().join("out")).await;
        assert!(matches!(result, Err(SandboxError::MissingObject(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_cannot_leave_the_root() {
        let dir = tempdir().unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret.enc"), b"not yours").unwrap();

        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.join("planted.enc"), root.join("dangling.enc")).unwrap();
        let sandbox = Sandbox::new(&root);

        let source = dir.path().join("src.bin");
        std::fs::write(&source, b"payload").unwrap();

        let stored = sandbox.store(&source, "link/obj.enc").await;
        assert!(matches!(stored, Err(SandboxError::PathEscape(_))));
        let stored = sandbox.store(&source, "link/deeper/obj.enc").await;
        assert!(matches!(stored, Err(SandboxError::PathEscape(_))));
        let stored = sandbox.store(&source, "dangling.enc").await;
        assert!(matches!(stored, Err(SandboxError::PathEscape(_))));
        assert!(!outside.join("obj.enc").exists());
        assert!(!outside.join("deeper").exists());
        assert!(!outside.join("planted.enc").exists());

        let fetched = sandbox.fetch("link/secret.enc", &dir.path().join("out.bin")).await;
        assert!(matches!(fetched, Err(SandboxError::PathEscape(_))));
        assert!(!dir.path().join("out.bin").exists());
    }
}
