//! Namespace backend trait for pluggable implementations

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use macns_core::{CallLog, Error, Result};

/// Open reference to a network namespace
///
/// Holding the handle keeps the namespace alive. Dropping it closes the
/// descriptor; it never destroys a namespace this process does not own.
#[derive(Debug)]
pub struct NamespaceHandle {
    file: File,
    id: u64,
}

impl NamespaceHandle {
    /// Wrap an open namespace file
    ///
    /// # Errors
    /// Returns [`Error::NamespaceQuery`] if the file cannot be inspected
    pub fn from_file(file: File) -> Result<Self> {
        let id = file
            .metadata()
            .map_err(|source| Error::NamespaceQuery { source })?
            .ino();
        Ok(Self { file, id })
    }

    /// Kernel identity of the namespace (inode of its nsfs file)
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Give up the underlying file
    #[must_use]
    pub fn into_file(self) -> File {
        self.file
    }
}

impl AsFd for NamespaceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl std::fmt::Display for NamespaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "net:[{}]", self.id)
    }
}

/// A namespace created by this process and named by a bind mount
///
/// Destroyed exactly once through [`NamespaceBackend::destroy`], which
/// consumes it. A macvlan reparented into it lives exactly as long as it.
#[derive(Debug)]
pub struct TargetNamespace {
    /// Open handle to the namespace
    pub handle: NamespaceHandle,
    /// Bind-mount path naming it
    pub path: PathBuf,
}

/// Outcome of preparing the named-namespace directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    /// The directory existed; nothing was mounted
    AlreadyPresent,
    /// The directory was created and a tmpfs mounted on it
    Mounted,
}

/// Trait for namespace backends
///
/// This allows for different implementations:
/// - [`NetnsManager`](crate::NetnsManager) - Production, real syscalls
/// - [`MockNamespaceBackend`] - Testing without privileges
///
/// Every method acts on the calling thread's namespace context.
pub trait NamespaceBackend: Send + Sync {
    /// Open a handle to the calling thread's current namespace
    fn capture_original(&self) -> Result<NamespaceHandle>;

    /// Make sure `dir` exists and can hold namespace bind mounts
    fn ensure_netns_dir(&self, dir: &Path) -> Result<DirState>;

    /// Create a namespace, switch into it, and bind-mount it at `path`
    fn create_named(&self, path: &Path) -> Result<TargetNamespace>;

    /// Switch the calling thread into the namespace behind `handle`
    fn enter(&self, handle: &NamespaceHandle) -> Result<()>;

    /// Close the handle, unmount, and remove the file, stopping at the first failure
    fn destroy(&self, target: TargetNamespace) -> Result<()>;

    /// Release a handle to a namespace this process does not own
    fn release(&self, handle: NamespaceHandle);
}

/// Mock backend for testing (no privileges, no kernel namespaces)
///
/// Handles are backed by `/dev/null` (original) and `/dev/zero` (target) so
/// the two have distinct ids. Every call is appended to a [`CallLog`].
#[derive(Clone)]
pub struct MockNamespaceBackend {
    state: Arc<Mutex<MockState>>,
    log: CallLog,
}

#[derive(Default)]
struct MockState {
    labels: HashMap<u64, &'static str>,
    current: Option<&'static str>,
    mounted_dirs: HashSet<PathBuf>,
    named: HashSet<PathBuf>,
    mount_count: usize,
    fail_on: HashSet<&'static str>,
}

impl MockNamespaceBackend {
    /// Create a new mock backend with its own log
    #[must_use]
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    /// Create a mock backend recording into a shared log
    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        let state = MockState {
            current: Some("original"),
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            log,
        }
    }

    /// Make an operation fail (`capture`, `ensure_dir`, `create`, `enter`, `destroy`)
    #[must_use]
    pub fn failing(self, operation: &'static str) -> Self {
        self.lock().fail_on.insert(operation);
        self
    }

    /// Label of the namespace the simulated thread is in
    #[must_use]
    pub fn current(&self) -> Option<&'static str> {
        self.lock().current
    }

    /// Whether a named namespace still exists at `path`
    #[must_use]
    pub fn is_named(&self, path: &Path) -> bool {
        self.lock().named.contains(path)
    }

    /// Number of tmpfs mounts performed
    #[must_use]
    pub fn mount_count(&self) -> usize {
        self.lock().mount_count
    }

    /// The shared call log
    #[must_use]
    pub const fn log(&self) -> &CallLog {
        &self.log
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.lock().fail_on.contains(operation) {
            return Err(Error::PermissionDenied {
                operation: format!("mock {operation}"),
            });
        }
        Ok(())
    }

    fn open_handle(&self, device: &str, label: &'static str) -> Result<NamespaceHandle> {
        let file = File::open(device).map_err(|source| Error::NamespaceQuery { source })?;
        let handle = NamespaceHandle::from_file(file)?;
        self.lock().labels.insert(handle.id(), label);
        Ok(handle)
    }
}

impl Default for MockNamespaceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockNamespaceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNamespaceBackend").finish_non_exhaustive()
    }
}

impl NamespaceBackend for MockNamespaceBackend {
    fn capture_original(&self) -> Result<NamespaceHandle> {
        self.check("capture")?;
        self.log.record("ns:capture");
        self.open_handle("/dev/null", "original")
    }

    fn ensure_netns_dir(&self, dir: &Path) -> Result<DirState> {
        self.check("ensure_dir")?;
        self.log.record(format!("ns:ensure_dir {}", dir.display()));

        let mut state = self.lock();
        if !state.mounted_dirs.insert(dir.to_path_buf()) {
            return Ok(DirState::AlreadyPresent);
        }
        state.mount_count += 1;
        drop(state);

        tracing::debug!(dir = %dir.display(), "Mock: Mounted netns dir");
        Ok(DirState::Mounted)
    }

    fn create_named(&self, path: &Path) -> Result<TargetNamespace> {
        self.check("create")?;
        self.log.record(format!("ns:create {}", path.display()));

        let handle = self.open_handle("/dev/zero", "target")?;
        let mut state = self.lock();
        state.current = Some("target");
        state.named.insert(path.to_path_buf());
        drop(state);

        Ok(TargetNamespace {
            handle,
            path: path.to_path_buf(),
        })
    }

    fn enter(&self, handle: &NamespaceHandle) -> Result<()> {
        self.check("enter")?;
        let mut state = self.lock();
        let label = state.labels.get(&handle.id()).copied();
        state.current = label;
        drop(state);

        self.log
            .record(format!("ns:enter {}", label.unwrap_or("unknown")));
        Ok(())
    }

    fn destroy(&self, target: TargetNamespace) -> Result<()> {
        self.log
            .record(format!("ns:destroy {}", target.path.display()));
        self.check("destroy")?;
        self.lock().named.remove(&target.path);
        Ok(())
    }

    fn release(&self, handle: NamespaceHandle) {
        self.log.record("ns:release");
        drop(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_tracks_context() {
        let backend = MockNamespaceBackend::new();

        let original = backend.capture_original().unwrap();
        let target = backend
            .create_named(Path::new("/var/run/netns/w000t1"))
            .unwrap();
        assert_eq!(backend.current(), Some("target"));
        assert_ne!(original.id(), target.handle.id());

        backend.enter(&original).unwrap();
        assert_eq!(backend.current(), Some("original"));

        backend.destroy(target).unwrap();
        assert!(!backend.is_named(Path::new("/var/run/netns/w000t1")));

        backend.release(original);
        assert_eq!(backend.log().count("ns:"), 5);
    }

    #[test]
    fn test_mock_dir_mounted_once() {
        let backend = MockNamespaceBackend::new();
        let dir = Path::new("/run/netns");

        assert_eq!(backend.ensure_netns_dir(dir).unwrap(), DirState::Mounted);
        assert_eq!(
            backend.ensure_netns_dir(dir).unwrap(),
            DirState::AlreadyPresent
        );
        assert_eq!(backend.mount_count(), 1);
    }

    #[test]
    fn test_mock_failure_injection() {
        let backend = MockNamespaceBackend::new().failing("create");
        let result = backend.create_named(Path::new("/var/run/netns/w000t2"));

        assert!(result.is_err());
        assert!(!backend.is_named(Path::new("/var/run/netns/w000t2")));
    }

    #[test]
    fn test_handle_display() {
        let backend = MockNamespaceBackend::new();
        let handle = backend.capture_original().unwrap();
        assert!(handle.to_string().starts_with("net:["));
    }
}
