//! Network namespace lifecycle management

use std::fs::{self, DirBuilder, File};
use std::io::ErrorKind;
use std::os::fd::IntoRawFd;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use nix::errno::Errno;
use nix::mount::{MsFlags, mount, umount};
use nix::sched::{CloneFlags, setns, unshare};
use tracing::{debug, info, warn};

use macns_core::{Error, Result};

use crate::backend::{DirState, NamespaceBackend, NamespaceHandle, TargetNamespace};

/// Namespace file of the calling thread
///
/// `/proc/self` would name the thread-group leader, whose namespace may
/// differ from the thread doing the work.
pub const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Production namespace backend built on `unshare(2)`, `setns(2)` and `mount(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct NetnsManager;

impl NetnsManager {
    /// Create a new namespace manager
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn open_current() -> Result<NamespaceHandle> {
        let file = File::open(THREAD_NETNS).map_err(|source| Error::NamespaceQuery { source })?;
        NamespaceHandle::from_file(file)
    }

    fn bind_flags() -> MsFlags {
        MsFlags::MS_BIND | MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV
    }
}

impl NamespaceBackend for NetnsManager {
    fn capture_original(&self) -> Result<NamespaceHandle> {
        let handle = Self::open_current()?;
        info!(namespace = %handle, "Captured original network namespace");
        Ok(handle)
    }

    fn ensure_netns_dir(&self, dir: &Path) -> Result<DirState> {
        match fs::metadata(dir) {
            Ok(_) => {
                debug!(dir = %dir.display(), "Namespace directory already present");
                return Ok(DirState::AlreadyPresent);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(Error::Dir {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        }

        debug!(dir = %dir.display(), "Creating namespace directory");
        DirBuilder::new()
            .mode(0o755)
            .create(dir)
            .map_err(|source| Error::Dir {
                path: dir.to_path_buf(),
                source,
            })?;

        debug!(dir = %dir.display(), "Mounting tmpfs on namespace directory");
        mount(
            Some("tmpfs"),
            dir,
            Some("tmpfs"),
            MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            None::<&str>,
        )
        .map_err(|source| Error::Mount {
            path: dir.to_path_buf(),
            source,
        })?;

        info!(dir = %dir.display(), "Namespace directory mounted");
        Ok(DirState::Mounted)
    }

    fn create_named(&self, path: &Path) -> Result<TargetNamespace> {
        debug!("Creating network namespace");
        unshare(CloneFlags::CLONE_NEWNET).map_err(|source| Error::NamespaceCreate { source })?;

        let handle = Self::open_current()?;

        debug!(path = %path.display(), "Creating namespace file");
        File::create(path).map_err(|source| Error::File {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "Bind-mounting namespace");
        if let Err(source) = mount(
            Some(THREAD_NETNS),
            path,
            None::<&str>,
            Self::bind_flags(),
            None::<&str>,
        ) {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Could not remove namespace file");
            }
            return Err(Error::Mount {
                path: path.to_path_buf(),
                source,
            });
        }

        info!(namespace = %handle, path = %path.display(), "Named network namespace created");
        Ok(TargetNamespace {
            handle,
            path: path.to_path_buf(),
        })
    }

    fn enter(&self, handle: &NamespaceHandle) -> Result<()> {
        setns(handle, CloneFlags::CLONE_NEWNET).map_err(|source| Error::NamespaceSwitch { source })?;
        debug!(namespace = %handle, "Switched network namespace");
        Ok(())
    }

    fn destroy(&self, target: TargetNamespace) -> Result<()> {
        let TargetNamespace { handle, path } = target;
        debug!(namespace = %handle, path = %path.display(), "Destroying namespace");

        let fd = handle.into_file().into_raw_fd();
        // SAFETY: fd was just released from an owned File and is closed exactly once here.
        Errno::result(unsafe { libc::close(fd) })
            .map_err(|source| Error::NamespaceClose { source })?;

        umount(path.as_path()).map_err(|source| Error::Unmount {
            path: path.clone(),
            source,
        })?;

        fs::remove_file(&path).map_err(|source| Error::FileRemove {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), "Named network namespace destroyed");
        Ok(())
    }

    fn release(&self, handle: NamespaceHandle) {
        debug!(namespace = %handle, "Releasing original namespace handle");
        drop(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_original() {
        let manager = NetnsManager::new();
        let handle = manager.capture_original().unwrap();
        assert!(handle.id() > 0);
    }

    #[test]
    fn test_capture_is_stable() {
        let manager = NetnsManager::new();
        let first = manager.capture_original().unwrap();
        let second = manager.capture_original().unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn test_existing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = NetnsManager::new();

        let first = manager.ensure_netns_dir(dir.path()).unwrap();
        let second = manager.ensure_netns_dir(dir.path()).unwrap();

        assert_eq!(first, DirState::AlreadyPresent);
        assert_eq!(second, DirState::AlreadyPresent);
    }
}
