//! Thread affinity for engine state.

use std::mem::ManuallyDrop;
use std::thread::{self, ThreadId};

use crate::error::{QjsError, QjsResult};

/// State that may only be touched on the thread that created it.
///
/// The container itself can be shared across threads (so that handles to it
/// may travel), but every access goes through [`ThreadAffine::get`], which
/// fails with [`QjsError::WrongThread`] anywhere but the owning thread.
pub(crate) struct ThreadAffine<T> {
    owner: ThreadId,
    value: ManuallyDrop<T>,
}

// SAFETY: `value` is only reachable through `get`, which checks the owner
// thread, and `Drop` leaks instead of dropping off-thread.
unsafe impl<T> Send for ThreadAffine<T> {}
// SAFETY: see above
unsafe impl<T> Sync for ThreadAffine<T> {}

impl<T> ThreadAffine<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            owner: thread::current().id(),
            value: ManuallyDrop::new(value),
        }
    }

    pub(crate) fn check_access(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub(crate) fn get(&self) -> QjsResult<&T> {
        if self.check_access() {
            Ok(&self.value)
        } else {
            Err(QjsError::WrongThread)
        }
    }
}

impl<T> Drop for ThreadAffine<T> {
    fn drop(&mut self) {
        if self.check_access() {
            // SAFETY: dropped exactly once, on the owning thread
            unsafe { ManuallyDrop::drop(&mut self.value) };
        } else {
            tracing::warn!("thread-affine state dropped on a foreign thread; leaking it");
        }
    }
}
