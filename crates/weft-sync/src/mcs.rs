//! MCS queue lock.
//!
//! Mellor-Crummey/Scott's FIFO mutex: contenders form a linked queue of
//! stack-resident nodes and each waiter spins only on its own node's
//! `blocked` flag, so handoff touches exactly one remote cache line.
//!
//! Reference: Mellor-Crummey and Scott, "Algorithms for scalable
//! synchronization on shared-memory multiprocessors", ACM TOCS 9(1), 1991.
//!
//! The raw [`McsLock`] is the primitive; [`Mutex`] wraps it with a
//! closure-scoped API for data that lives in statics (the detector's global
//! maps and the deferred race-report list).

use std::cell::UnsafeCell;
use std::hint;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicPtr};

/// A waiter's queue entry. Stack-allocated at the call site; it exists only
/// for the duration of one critical section, and peer threads hold its
/// address only while the owning call is active.
#[derive(Debug)]
pub struct McsNode {
    next: AtomicPtr<McsNode>,
    blocked: AtomicBool,
    _pinned: PhantomPinned,
}

impl McsNode {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            blocked: AtomicBool::new(true),
            _pinned: PhantomPinned,
        }
    }

    fn as_raw(self: Pin<&Self>) -> *mut McsNode {
        (self.get_ref() as *const McsNode).cast_mut()
    }

    /// Re-arm the spin flag. Only valid while no peer can observe the node.
    pub(crate) fn prepare_wait(self: Pin<&Self>) {
        self.blocked.store(true, Relaxed);
    }

    pub(crate) fn is_blocked(self: Pin<&Self>) -> bool {
        self.blocked.load(Acquire)
    }

    /// Release-store the wakeup. Used by the phase-fair lock when the last
    /// departing reader hands the lock to the queued writer.
    pub(crate) fn wake(&self) {
        self.blocked.store(false, Release);
    }
}

impl Default for McsNode {
    fn default() -> Self {
        Self::new()
    }
}

/// The lock word: an atomic pointer to the queue tail. Null means free.
#[derive(Debug)]
pub struct McsLock {
    tail: AtomicPtr<McsNode>,
}

impl McsLock {
    #[must_use]
    pub const fn new() -> Self {
        Self { tail: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Acquires the lock, spinning behind any earlier contenders.
    ///
    /// # Safety
    ///
    /// `node` must not be in use by any other lock operation, and its
    /// address must remain stable until the matching [`unlock`] returns.
    ///
    /// [`unlock`]: Self::unlock
    pub unsafe fn lock(&self, node: Pin<&McsNode>) {
        let me = node.as_raw();
        node.next.store(ptr::null_mut(), Relaxed);
        // Release half publishes the `next` init before anyone can see the
        // node; acquire half orders us after the predecessor's enqueue.
        let pred = self.tail.swap(me, AcqRel);
        if pred.is_null() {
            return;
        }
        // Not yet linked, so no peer can observe this store.
        node.blocked.store(true, Relaxed);
        // Release: `blocked = true` must be visible before the link is.
        unsafe { (*pred).next.store(me, Release) };
        // Acquire: the predecessor's critical-section writes must be visible
        // before ours begin.
        while node.blocked.load(Acquire) {
            hint::spin_loop();
        }
    }

    /// Acquires the lock only if it is free at the instant of the attempt.
    ///
    /// # Safety
    ///
    /// Same contract as [`lock`](Self::lock); the node is enqueued only when
    /// `true` is returned.
    pub unsafe fn try_lock(&self, node: Pin<&McsNode>) -> bool {
        node.next.store(ptr::null_mut(), Relaxed);
        self.tail
            .compare_exchange(ptr::null_mut(), node.as_raw(), AcqRel, Relaxed)
            .is_ok()
    }

    /// Releases the lock, handing it to the successor if one is queued.
    ///
    /// # Safety
    ///
    /// `node` must be the node a `lock`/`try_lock` call on this lock
    /// succeeded with, and the critical section must be over.
    pub unsafe fn unlock(&self, node: Pin<&McsNode>) {
        let me = node.as_raw();
        let mut succ = node.next.load(Acquire);
        if succ.is_null() {
            // No known successor. If we are still the tail, unlink and be
            // done; release keeps critical-section stores above the unlink.
            if self
                .tail
                .compare_exchange(me, ptr::null_mut(), Release, Relaxed)
                .is_ok()
            {
                return;
            }
            // A successor swapped itself in and is mid-link; wait for the
            // link to land.
            loop {
                succ = node.next.load(Acquire);
                if !succ.is_null() {
                    break;
                }
                hint::spin_loop();
            }
        }
        // Release: hand our writes to the successor along with the lock.
        unsafe { (*succ).blocked.store(false, Release) };
    }

    /// Whether the queue is empty right now. Diagnostic only.
    #[cfg(test)]
    pub(crate) fn is_free(&self) -> bool {
        self.tail.load(Relaxed).is_null()
    }
}

impl Default for McsLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Closure-scoped mutex over the MCS lock.
///
/// The queue node lives on the `lock_with` frame, so callers never manage
/// node lifetimes. `const fn new` lets protected data live in statics.
pub struct Mutex<T> {
    lock: McsLock,
    data: UnsafeCell<T>,
}

// Same bounds as `std::sync::Mutex`.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self { lock: McsLock::new(), data: UnsafeCell::new(value) }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Runs `f` with exclusive access to the data.
    pub fn lock_with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let node = McsNode::new();
        // SAFETY: the node stays on this frame and cannot move until the
        // release guard below has run.
        let node = unsafe { Pin::new_unchecked(&node) };
        // SAFETY: fresh node, unused by any other operation.
        unsafe { self.lock.lock(node) };
        let _release = ReleaseOnDrop { lock: &self.lock, node };
        // SAFETY: the queue lock is held for the lifetime of `_release`.
        f(unsafe { &mut *self.data.get() })
    }

    /// Runs `f` with exclusive access if the lock is uncontended, else
    /// returns `None` without blocking.
    pub fn try_lock_with<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let node = McsNode::new();
        // SAFETY: as in `lock_with`.
        let node = unsafe { Pin::new_unchecked(&node) };
        // SAFETY: fresh node, unused by any other operation.
        if !unsafe { self.lock.try_lock(node) } {
            return None;
        }
        let _release = ReleaseOnDrop { lock: &self.lock, node };
        // SAFETY: the queue lock is held for the lifetime of `_release`.
        Some(f(unsafe { &mut *self.data.get() }))
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Unlocks on drop so a panicking closure does not leave the queue wedged.
struct ReleaseOnDrop<'a> {
    lock: &'a McsLock,
    node: Pin<&'a McsNode>,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        // SAFETY: constructed only while `node` holds `lock`.
        unsafe { self.lock.unlock(self.node) };
    }
}
