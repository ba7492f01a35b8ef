//! Bookkeeping records: the out-of-line block holding the strong and weak
//! counts plus one deletion-strategy payload.
//!
//! `Record<P>` is `#[repr(C)]` with the `Header` first, so a
//! `NonNull<Header>` is the type-erased address of any record. The header
//! carries two function pointers, fixed when the record is built, that know
//! the concrete payload type: `destroy` disposes of the managed object and
//! `free` drops what is left of the payload and returns the memory.
//!
//! Counting rules
//! - The object is destroyed when the strong count reaches zero.
//! - The record is freed when both counts are zero.
//! - While the payload is being destroyed the record holds one weak unit on
//!   itself, so a payload whose destructor drops the last weak handle to its
//!   own record cannot free the record mid-destruction.
//!
//! Counts only move through `StrongRef` and `WeakRef`, each of which owns
//! exactly one unit as a linear token.

use crate::error::AllocError;
use crate::strategy::{DestroyPayload, InPlace, Strategy};
use crate::tokens::{Count, Counter, Strong, Token, Weak};
use core::mem::ManuallyDrop;
use core::ptr::{self, NonNull};
use std::alloc::{self, Layout};

pub(crate) struct Header {
    strong: Counter<Strong>,
    weak: Counter<Weak>,
    strategy: Strategy,
    destroy: unsafe fn(NonNull<Header>),
    free: unsafe fn(NonNull<Header>),
}

impl Header {
    /// Free a record that never handed out a unit.
    ///
    /// # Safety
    /// `header` came from `Record::try_new`, no handle was ever acquired on
    /// it, and its payload needs no destruction (for `InPlace`, the value was
    /// never written).
    pub(crate) unsafe fn discard(header: NonNull<Header>) {
        let h = unsafe { header.as_ref() };
        debug_assert_eq!(h.strong.current(), 0);
        debug_assert_eq!(h.weak.current(), 0);
        let free = h.free;
        unsafe { free(header) }
    }
}

#[repr(C)]
pub(crate) struct Record<P> {
    header: Header,
    payload: P,
}

impl<P: DestroyPayload> Record<P> {
    /// Allocate a record around `payload` with both counts at zero.
    ///
    /// On failure the payload is handed back untouched so the caller decides
    /// how the object it carries is disposed of.
    pub(crate) fn try_new(payload: P) -> Result<NonNull<Header>, (AllocError, P)> {
        let layout = Layout::new::<Self>();
        let Some(raw) = Self::allocate(layout) else {
            log::debug!(
                "{:?} record allocation failed ({} bytes)",
                P::STRATEGY,
                layout.size()
            );
            return Err((AllocError::new(layout), payload));
        };
        let record = Record {
            header: Header {
                strong: Counter::new(0),
                weak: Counter::new(0),
                strategy: P::STRATEGY,
                destroy: Self::destroy_erased,
                free: Self::free_erased,
            },
            payload,
        };
        // SAFETY: raw is freshly allocated with this type's layout.
        unsafe { raw.as_ptr().write(record) };
        log::trace!("allocated {:?} record at {:p}", P::STRATEGY, raw);
        Ok(raw.cast())
    }

    fn allocate(layout: Layout) -> Option<NonNull<Self>> {
        #[cfg(test)]
        if testing::take_failure() {
            return None;
        }
        // SAFETY: layout is non-zero sized because it contains a `Header`.
        let raw = unsafe { alloc::alloc(layout) }.cast::<Self>();
        let raw = NonNull::new(raw)?;
        #[cfg(test)]
        testing::note_alloc();
        Some(raw)
    }

    unsafe fn destroy_erased(header: NonNull<Header>) {
        let record = header.cast::<Self>().as_ptr();
        // SAFETY: reached once, from the release of the last strong unit.
        unsafe { (*record).payload.destroy() }
    }

    unsafe fn free_erased(header: NonNull<Header>) {
        let record = header.cast::<Self>().as_ptr();
        log::trace!("freeing {:?} record at {:p}", P::STRATEGY, record);
        // SAFETY: both counts are zero; nothing else refers to the record.
        unsafe {
            ptr::drop_in_place(record);
            alloc::dealloc(record.cast(), Layout::new::<Self>());
        }
        #[cfg(test)]
        testing::note_free();
    }
}

impl<T> Record<InPlace<T>> {
    /// Address of the value slot inside an in-place record.
    ///
    /// # Safety
    /// `header` came from `Record::<InPlace<T>>::try_new` and is not freed.
    pub(crate) unsafe fn value_slot(header: NonNull<Header>) -> NonNull<T> {
        let record = header.cast::<Self>().as_ptr();
        // SAFETY: InPlace<T> is transparent over MaybeUninit<T>.
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*record).payload).cast::<T>()) }
    }
}

/// One strong unit of a record. Cloning acquires another unit; dropping the
/// last one destroys the payload.
pub(crate) struct StrongRef {
    header: NonNull<Header>,
    token: ManuallyDrop<Token<'static, Counter<Strong>>>,
}

impl StrongRef {
    /// # Safety
    /// `header` points to a live record whose payload has not been destroyed.
    pub(crate) unsafe fn acquire(header: NonNull<Header>) -> Self {
        let token = unsafe { header.as_ref() }.strong.get();
        Self {
            header,
            token: ManuallyDrop::new(token),
        }
    }

    fn header(&self) -> &Header {
        // SAFETY: our unit keeps the record allocated.
        unsafe { self.header.as_ref() }
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.header().strong.current()
    }

    pub(crate) fn weak_count(&self) -> usize {
        self.header().weak.current()
    }

    pub(crate) fn strategy(&self) -> Strategy {
        self.header().strategy
    }

    pub(crate) fn downgrade(&self) -> WeakRef {
        // SAFETY: our unit keeps the record allocated.
        unsafe { WeakRef::acquire(self.header) }
    }

    pub(crate) fn as_ptr(&self) -> NonNull<Header> {
        self.header
    }
}

impl Clone for StrongRef {
    fn clone(&self) -> Self {
        // SAFETY: our unit keeps the payload alive.
        unsafe { Self::acquire(self.header) }
    }
}

impl Drop for StrongRef {
    fn drop(&mut self) {
        // SAFETY: the token is taken exactly once, here.
        let token = unsafe { ManuallyDrop::take(&mut self.token) };
        let header = self.header;
        if !self.header().strong.put(token) {
            return;
        }
        // Pin the record across payload destruction; returning this unit
        // frees the record if no other weak handle is left.
        let keepalive = self.downgrade();
        let destroy = self.header().destroy;
        // SAFETY: strong count just reached zero; destroy runs exactly once.
        unsafe { destroy(header) };
        drop(keepalive);
    }
}

/// One weak unit of a record. Keeps the record allocated, never the object.
pub(crate) struct WeakRef {
    header: NonNull<Header>,
    token: ManuallyDrop<Token<'static, Counter<Weak>>>,
}

impl WeakRef {
    /// # Safety
    /// `header` points to a record that is not freed.
    unsafe fn acquire(header: NonNull<Header>) -> Self {
        let token = unsafe { header.as_ref() }.weak.get();
        Self {
            header,
            token: ManuallyDrop::new(token),
        }
    }

    fn header(&self) -> &Header {
        // SAFETY: our unit keeps the record allocated.
        unsafe { self.header.as_ref() }
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.header().strong.current()
    }

    pub(crate) fn weak_count(&self) -> usize {
        self.header().weak.current()
    }

    /// Acquire a strong unit unless the object is already gone.
    pub(crate) fn upgrade(&self) -> Option<StrongRef> {
        if self.strong_count() == 0 {
            return None;
        }
        // SAFETY: a non-zero strong count means the payload is alive.
        Some(unsafe { StrongRef::acquire(self.header) })
    }

    pub(crate) fn as_ptr(&self) -> NonNull<Header> {
        self.header
    }
}

impl Clone for WeakRef {
    fn clone(&self) -> Self {
        // SAFETY: our unit keeps the record allocated.
        unsafe { Self::acquire(self.header) }
    }
}

impl Drop for WeakRef {
    fn drop(&mut self) {
        // SAFETY: the token is taken exactly once, here.
        let token = unsafe { ManuallyDrop::take(&mut self.token) };
        let h = self.header();
        if h.weak.put(token) && h.strong.current() == 0 {
            let free = h.free;
            // SAFETY: both counts are zero and this was the last handle.
            unsafe { free(self.header) };
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Per-thread allocation failpoint and live-record accounting.

    use core::cell::Cell;

    thread_local! {
        static FAIL_NEXT: Cell<bool> = const { Cell::new(false) };
        static LIVE: Cell<usize> = const { Cell::new(0) };
    }

    /// Make the next record allocation on this thread fail.
    pub(crate) fn fail_next_allocation() {
        FAIL_NEXT.with(|f| f.set(true));
    }

    pub(crate) fn take_failure() -> bool {
        FAIL_NEXT.with(|f| f.replace(false))
    }

    /// Records allocated and not yet freed on this thread.
    pub(crate) fn live_records() -> usize {
        LIVE.with(|l| l.get())
    }

    pub(crate) fn note_alloc() {
        LIVE.with(|l| l.set(l.get() + 1));
    }

    pub(crate) fn note_free() {
        LIVE.with(|l| l.set(l.get() - 1));
    }
}
