use std::sync::{Mutex, MutexGuard};

/// Locks a mutex and recovers from poisoning.
///
/// Guarded state is only ever replaced wholesale, so a panic elsewhere never
/// leaves it half-written.
pub(crate) fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            mutex.clear_poison();
            poisoned.into_inner()
        }
    }
}
