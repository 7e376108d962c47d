// Utility functions

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Get the .ralph-ui directory path for a project.
#[inline]
pub fn ralph_ui_dir(project_path: &Path) -> PathBuf {
    project_path.join(".ralph-ui")
}

/// Safely acquire a mutex lock, recovering from poisoning by returning the guard.
/// This is useful when you want to continue even if a previous thread panicked.
/// The mutex state may be inconsistent, so use with caution.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

/// Read-lock counterpart of [`lock_mutex_recover`].
pub fn read_lock_recover<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("RwLock was poisoned, recovering read guard: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

/// Write-lock counterpart of [`lock_mutex_recover`].
pub fn write_lock_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("RwLock was poisoned, recovering write guard: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ralph_ui_dir() {
        let dir = ralph_ui_dir(Path::new("/tmp/project"));
        assert_eq!(dir, PathBuf::from("/tmp/project/.ralph-ui"));
    }

    #[test]
    fn test_lock_mutex_recover_after_poison() {
        let mutex = Arc::new(Mutex::new(1));
        let poisoner = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(mutex.is_poisoned());
        let mut guard = lock_mutex_recover(&mutex);
        *guard += 1;
        assert_eq!(*guard, 2);
    }

    #[test]
    fn test_rwlock_recover_after_poison() {
        let lock = Arc::new(RwLock::new(vec![1]));
        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        write_lock_recover(&lock).push(2);
        assert_eq!(*read_lock_recover(&lock), vec![1, 2]);
    }
}
