//! The renewal lock.
//!
//! A renewal is bracketed by two processes: the trigger's pre-save hook
//! takes the lock and stops the subsystem, and the post-save run adopts the
//! held lock and must release it on every exit path. [`HeldLock`] is the
//! handle that makes release happen exactly once.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;

/// Name of the lock serialising CA certificate renewals.
pub const RENEWAL_LOCK_NAME: &str = "renew_ca_cert";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock {name:?} is held ({holder})")]
    Held { name: String, holder: String },

    #[error("lock {0:?} is not held")]
    NotHeld(String),

    #[error("lock io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A named mutual-exclusion lock that may outlive the process holding it.
pub trait NamedLock {
    fn name(&self) -> &str;
    fn try_acquire(&self) -> Result<(), LockError>;
    fn release(&self) -> Result<(), LockError>;
    fn is_held(&self) -> Result<bool, LockError>;
}

/// Ownership of an acquired lock. Released by [`HeldLock::release`] or,
/// failing that, on drop.
pub struct HeldLock<'a> {
    lock: &'a dyn NamedLock,
    armed: bool,
}

impl<'a> HeldLock<'a> {
    pub fn acquire(lock: &'a dyn NamedLock) -> Result<Self, LockError> {
        lock.try_acquire()?;
        tracing::debug!(lock = lock.name(), "Lock acquired");
        Ok(Self { lock, armed: true })
    }

    /// Take over a lock acquired earlier, usually by another process.
    pub fn adopt(lock: &'a dyn NamedLock) -> Result<Self, LockError> {
        if !lock.is_held()? {
            return Err(LockError::NotHeld(lock.name().to_string()));
        }
        tracing::debug!(lock = lock.name(), "Lock adopted");
        Ok(Self { lock, armed: true })
    }

    /// Adopt the lock if it is held, otherwise acquire it.
    pub fn adopt_or_acquire(lock: &'a dyn NamedLock) -> Result<Self, LockError> {
        if lock.is_held()? {
            Self::adopt(lock)
        } else {
            Self::acquire(lock)
        }
    }

    pub fn name(&self) -> &str {
        self.lock.name()
    }

    pub fn release(mut self) -> Result<(), LockError> {
        self.armed = false;
        let result = self.lock.release();
        match &result {
            Ok(()) => tracing::debug!(lock = self.lock.name(), "Lock released"),
            Err(e) => tracing::error!(lock = self.lock.name(), error = %e, "Lock release failed"),
        }
        result
    }

    /// Leave the lock held for a later process to adopt.
    pub fn hand_off(mut self) {
        self.armed = false;
        tracing::debug!(lock = self.lock.name(), "Lock handed off");
    }
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            if let Err(e) = self.lock.release() {
                tracing::error!(lock = self.lock.name(), error = %e, "Lock release on drop failed");
            }
        }
    }
}

/// Lock file created exclusively; its presence means the lock is held.
#[derive(Debug, Clone)]
pub struct FileLock {
    name: String,
    path: PathBuf,
}

impl FileLock {
    pub fn new(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn holder(&self) -> String {
        std::fs::read_to_string(&self.path)
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_else(|_| "unknown holder".to_string())
    }
}

impl NamedLock for FileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire(&self) -> Result<(), LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(LockError::Held {
                    name: self.name.clone(),
                    holder: self.holder(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        writeln!(file, "pid={}\nacquired={stamp}", std::process::id())?;
        Ok(())
    }

    fn release(&self) -> Result<(), LockError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LockError::NotHeld(self.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_held(&self) -> Result<bool, LockError> {
        Ok(self.path.exists())
    }
}

/// In-process lock that counts acquisitions and releases.
#[derive(Debug, Default)]
pub struct MemoryLock {
    name: String,
    held: AtomicBool,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
}

impl MemoryLock {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// A lock already taken by someone else.
    pub fn held(name: &str) -> Self {
        let lock = Self::new(name);
        lock.held.store(true, Ordering::SeqCst);
        lock
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl NamedLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire(&self) -> Result<(), LockError> {
        if self.held.swap(true, Ordering::SeqCst) {
            return Err(LockError::Held {
                name: self.name.clone(),
                holder: "in-process holder".to_string(),
            });
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> Result<(), LockError> {
        if !self.held.swap(false, Ordering::SeqCst) {
            return Err(LockError::NotHeld(self.name.clone()));
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_held(&self) -> Result<bool, LockError> {
        Ok(self.held.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_happens_once() {
        let lock = MemoryLock::new(RENEWAL_LOCK_NAME);
        let held = HeldLock::acquire(&lock).unwrap();
        held.release().unwrap();
        assert_eq!(lock.releases(), 1);
        assert!(!lock.is_held().unwrap());
    }

    #[test]
    fn drop_releases_an_unreleased_lock() {
        let lock = MemoryLock::new(RENEWAL_LOCK_NAME);
        {
            let _held = HeldLock::acquire(&lock).unwrap();
        }
        assert_eq!(lock.releases(), 1);
    }

    #[test]
    fn drop_after_panic_releases() {
        let lock = MemoryLock::new(RENEWAL_LOCK_NAME);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _held = HeldLock::acquire(&lock).unwrap();
            panic!("renewal step blew up");
        }));
        assert!(result.is_err());
        assert_eq!(lock.releases(), 1);
    }

    #[test]
    fn second_acquire_is_refused() {
        let lock = MemoryLock::new(RENEWAL_LOCK_NAME);
        let _held = HeldLock::acquire(&lock).unwrap();
        assert!(matches!(HeldLock::acquire(&lock), Err(LockError::Held { .. })));
        assert_eq!(lock.acquisitions(), 1);
    }

    #[test]
    fn adopt_requires_a_held_lock() {
        let free = MemoryLock::new(RENEWAL_LOCK_NAME);
        assert!(matches!(HeldLock::adopt(&free), Err(LockError::NotHeld(_))));

        let taken = MemoryLock::held(RENEWAL_LOCK_NAME);
        HeldLock::adopt(&taken).unwrap().release().unwrap();
        assert_eq!(taken.releases(), 1);
    }

    #[test]
    fn hand_off_keeps_the_lock_held() {
        let lock = MemoryLock::new(RENEWAL_LOCK_NAME);
        HeldLock::acquire(&lock).unwrap().hand_off();
        assert!(lock.is_held().unwrap());
        assert_eq!(lock.releases(), 0);
    }

    #[test]
    fn file_lock_round_trip() {
        let dir = kura_common::test::scratch_dir("file-lock");
        let lock = FileLock::new(RENEWAL_LOCK_NAME, dir.join("renewal.lock"));

        let held = HeldLock::acquire(&lock).unwrap();
        let contents = std::fs::read_to_string(lock.path()).unwrap();
        assert!(contents.contains(&format!("pid={}", std::process::id())));

        let other = FileLock::new(RENEWAL_LOCK_NAME, dir.join("renewal.lock"));
        match HeldLock::acquire(&other) {
            Err(LockError::Held { holder, .. }) => assert!(holder.contains("pid=")),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("lock acquired twice"),
        }

        held.release().unwrap();
        assert!(!lock.path().exists());
        assert!(matches!(lock.release(), Err(LockError::NotHeld(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
