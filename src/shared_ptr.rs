//! SharedPtr: the owning handle.
//!
//! A `SharedPtr<T>` is an explicit pair: an optional strong unit of a
//! bookkeeping record (what keeps the object alive) and an optional access
//! pointer (what the handle exposes). The two usually refer to the same
//! object, but aliasing and `map` let the access pointer refer to a field, a
//! trait-object view, or anything else whose lifetime is governed by the
//! record.

use crate::error::AllocError;
use crate::record::{Record, StrongRef};
use crate::strategy::{CustomDelete, DefaultDelete, DestroyPayload, Strategy};
use crate::weak_ptr::WeakPtr;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::{self, NonNull};
use std::alloc;

pub struct SharedPtr<T: ?Sized> {
    record: Option<StrongRef>,
    ptr: Option<NonNull<T>>,
    _owns: PhantomData<T>,
}

impl<T: ?Sized> SharedPtr<T> {
    /// An empty pointer: no record, no target, `use_count() == 0`.
    pub const fn null() -> Self {
        Self {
            record: None,
            ptr: None,
            _owns: PhantomData,
        }
    }

    pub(crate) fn from_parts(record: Option<StrongRef>, ptr: Option<NonNull<T>>) -> Self {
        Self {
            record,
            ptr,
            _owns: PhantomData,
        }
    }

    fn try_own<P: DestroyPayload>(payload: P, ptr: Option<NonNull<T>>) -> Result<Self, AllocError> {
        match Record::try_new(payload) {
            Ok(header) => {
                // SAFETY: fresh record; this is its first strong unit.
                let record = unsafe { StrongRef::acquire(header) };
                Ok(Self::from_parts(Some(record), ptr))
            }
            Err((err, payload)) => {
                // Ownership was never established; dispose of the object
                // the way its record would have.
                drop(payload);
                Err(err)
            }
        }
    }

    fn own<P: DestroyPayload>(payload: P, ptr: Option<NonNull<T>>) -> Self {
        match Self::try_own(payload, ptr) {
            Ok(p) => p,
            Err(err) => alloc::handle_alloc_error(err.layout()),
        }
    }

    /// Share `donor`'s ownership while exposing `ptr` instead of its target.
    ///
    /// `ptr` may be null; the result then owns a unit of the donor's record
    /// but reports `is_null()`.
    ///
    /// # Safety
    /// `ptr` must be null or stay valid for reads for as long as the donor's
    /// record keeps its object alive.
    pub unsafe fn aliasing<U: ?Sized>(donor: &SharedPtr<U>, ptr: *const T) -> Self {
        Self::from_parts(donor.record.clone(), NonNull::new(ptr as *mut T))
    }

    /// Safe aliasing for targets that outlive every record.
    pub fn alias_static<U: ?Sized>(donor: &SharedPtr<U>, target: &'static T) -> Self {
        // SAFETY: a 'static reference is valid for any record lifetime.
        unsafe { Self::aliasing(donor, target) }
    }

    /// Convert into a pointer to something reachable from the target:
    /// a field, a `dyn Trait` view, a slice of the target.
    ///
    /// The share is transferred, not duplicated; clone first to keep the
    /// original. A null pointer maps to a null pointer on the same record.
    pub fn map<U: ?Sized, F>(this: Self, f: F) -> SharedPtr<U>
    where
        F: FnOnce(&T) -> &U,
    {
        let SharedPtr { record, ptr, .. } = this;
        // SAFETY: `record` is held for the duration of the borrow and is
        // moved into the result, so the projected target stays alive.
        let ptr = ptr.map(|p| NonNull::from(f(unsafe { p.as_ref() })));
        SharedPtr::from_parts(record, ptr)
    }

    /// Create a weak observer of the same record and target.
    pub fn downgrade(this: &Self) -> WeakPtr<T> {
        WeakPtr::from_parts(this.record.as_ref().map(StrongRef::downgrade), this.ptr)
    }

    pub fn get(&self) -> Option<&T> {
        // SAFETY: the held strong unit keeps the target alive (or the caller
        // of `aliasing` vouched for it).
        self.ptr.map(|p| unsafe { &*p.as_ptr() })
    }

    pub fn as_non_null(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Number of strong owners of the record, or 0 without one.
    pub fn use_count(&self) -> usize {
        self.record.as_ref().map_or(0, StrongRef::strong_count)
    }

    pub fn weak_count(&self) -> usize {
        self.record.as_ref().map_or(0, StrongRef::weak_count)
    }

    /// Deletion strategy of the owned record, if any.
    pub fn strategy(&self) -> Option<Strategy> {
        self.record.as_ref().map(StrongRef::strategy)
    }

    /// True iff there is no target to access (the `false` of a boolean test).
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    pub fn is_some(&self) -> bool {
        self.ptr.is_some()
    }

    /// Release ownership and become empty.
    pub fn reset(&mut self) {
        *self = Self::null();
    }

    /// Move the pointer out, leaving an empty one behind.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }

    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(self, other);
    }

    /// True iff both pointers share one record (or both have none).
    pub fn owner_eq<U: ?Sized>(&self, other: &SharedPtr<U>) -> bool {
        self.record.as_ref().map(StrongRef::as_ptr) == other.record.as_ref().map(StrongRef::as_ptr)
    }

    fn addr(&self) -> *const () {
        self.ptr
            .map_or(ptr::null(), |p| p.as_ptr().cast::<()>() as *const ())
    }
}

impl<T: ?Sized + 'static> SharedPtr<T> {
    pub fn from_box(value: Box<T>) -> Self {
        Self::from_nullable(Some(value))
    }

    /// Take ownership of a possibly absent box.
    ///
    /// Unlike `null()`, `from_nullable(None)` still allocates a record:
    /// the result reports `use_count() == 1` while `is_null()` is true.
    pub fn from_nullable(value: Option<Box<T>>) -> Self {
        let payload = DefaultDelete::from_box(value);
        let ptr = payload.target();
        Self::own(payload, ptr)
    }

    /// As `from_nullable`, reporting allocation failure instead of aborting.
    /// The box is dropped before the error is returned.
    pub fn try_from_nullable(value: Option<Box<T>>) -> Result<Self, AllocError> {
        let payload = DefaultDelete::from_box(value);
        let ptr = payload.target();
        Self::try_own(payload, ptr)
    }

    /// # Safety
    /// `ptr` is null or was produced by `Box::into_raw`, and nothing else
    /// owns it.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        let payload = unsafe { DefaultDelete::from_raw(ptr) };
        let target = payload.target();
        Self::own(payload, target)
    }

    /// Own `value`, handing it to `deleter` instead of dropping it when the
    /// last owner goes away.
    pub fn with_deleter<D>(value: Box<T>, deleter: D) -> Self
    where
        D: FnOnce(Box<T>) + 'static,
    {
        let raw = Box::into_raw(value);
        // SAFETY: `raw` owns a box, and the deleter turns it back into one.
        unsafe {
            Self::from_raw_with_deleter(raw, move |p: NonNull<T>| {
                deleter(Box::from_raw(p.as_ptr()))
            })
        }
    }

    /// Own `ptr` through `deleter`. A null `ptr` is never passed to the
    /// deleter. If the record cannot be allocated the deleter runs on `ptr`
    /// before allocation failure is reported.
    ///
    /// # Safety
    /// `ptr` must be null or valid for reads until `deleter` is invoked.
    pub unsafe fn from_raw_with_deleter<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: FnOnce(NonNull<T>) + 'static,
    {
        let payload = CustomDelete::new(ptr, deleter);
        let target = payload.target();
        Self::own(payload, target)
    }

    /// As `from_raw_with_deleter`, reporting allocation failure instead of
    /// aborting. The deleter has already run on `ptr` when `Err` is returned.
    ///
    /// # Safety
    /// As for `from_raw_with_deleter`.
    pub unsafe fn try_from_raw_with_deleter<D>(ptr: *mut T, deleter: D) -> Result<Self, AllocError>
    where
        D: FnOnce(NonNull<T>) + 'static,
    {
        let payload = CustomDelete::new(ptr, deleter);
        let target = payload.target();
        Self::try_own(payload, target)
    }

    /// Release current ownership, then take ownership of `value`.
    pub fn reset_to(&mut self, value: Option<Box<T>>) {
        self.reset();
        *self = Self::from_nullable(value);
    }

    /// Release current ownership, then own `ptr` through `deleter`.
    ///
    /// # Safety
    /// As for `from_raw_with_deleter`.
    pub unsafe fn reset_with_deleter<D>(&mut self, ptr: *mut T, deleter: D)
    where
        D: FnOnce(NonNull<T>) + 'static,
    {
        self.reset();
        *self = unsafe { Self::from_raw_with_deleter(ptr, deleter) };
    }
}

impl<T: 'static> SharedPtr<T> {
    /// Box `value` and own it with the default strategy.
    ///
    /// This costs two allocations; `make_shared` builds the record and the
    /// value in one.
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: Sized> SharedPtr<T> {
    /// The access pointer, null when `is_null()`.
    pub fn as_ptr(&self) -> *const T {
        self.ptr.map_or(ptr::null(), |p| p.as_ptr() as *const T)
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        Self::from_parts(self.record.clone(), self.ptr)
    }

    /// Assignment from another pointer: a source sharing our record only
    /// replaces the access pointer; otherwise the new unit is acquired before
    /// the old one is released.
    fn clone_from(&mut self, source: &Self) {
        if self.owner_eq(source) {
            self.ptr = source.ptr;
        } else {
            *self = source.clone();
        }
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized + 'static> From<Box<T>> for SharedPtr<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(v) => v,
            None => panic!("dereferenced a null SharedPtr"),
        }
    }
}

// Equality is identity of the access pointers; the record is never consulted.

/// Compares access-pointer addresses.
///
/// Zero-sized targets owned through a `Box` all sit at the same dangling
/// address, so separately owned ones compare equal. Use `owner_eq` to tell
/// owners apart.
impl<T: ?Sized, U: ?Sized> PartialEq<SharedPtr<U>> for SharedPtr<T> {
    fn eq(&self, other: &SharedPtr<U>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for SharedPtr<T> {}

impl<T: ?Sized, U: ?Sized> PartialEq<*const U> for SharedPtr<T> {
    fn eq(&self, other: &*const U) -> bool {
        self.addr() == other.cast::<()>()
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<*mut U> for SharedPtr<T> {
    fn eq(&self, other: &*mut U) -> bool {
        self.addr() == other.cast::<()>() as *const ()
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<SharedPtr<T>> for *const U {
    fn eq(&self, other: &SharedPtr<T>) -> bool {
        other == self
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<SharedPtr<T>> for *mut U {
    fn eq(&self, other: &SharedPtr<T>) -> bool {
        other == self
    }
}

impl<T: ?Sized> Hash for SharedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPtr")
            .field("ptr", &self.addr())
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<T: ?Sized> fmt::Pointer for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::SharedPtr;
    use crate::make_shared::make_shared;
    use crate::record::testing::{fail_next_allocation, live_records};
    use crate::weak_ptr::WeakPtr;
    use std::cell::{Cell, RefCell};
    use std::ptr::NonNull;
    use std::rc::Rc;

    struct Flag(Rc<Cell<u32>>);

    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    // Test: allocation failure with a custom deleter.
    // Verifies: the deleter runs exactly once on the original pointer before
    // the error surfaces, and no record is left behind.
    #[test]
    fn deleter_runs_when_record_allocation_fails() {
        let seen = Rc::new(Cell::new(None));
        let s = seen.clone();
        let raw = Box::into_raw(Box::new(42u32));
        let before = live_records();

        fail_next_allocation();
        let res = unsafe {
            SharedPtr::try_from_raw_with_deleter(raw, move |p: NonNull<u32>| {
                s.set(Some(p.as_ptr()));
                drop(Box::from_raw(p.as_ptr()));
            })
        };
        assert!(res.is_err());
        assert_eq!(seen.get(), Some(raw));
        assert_eq!(live_records(), before);
    }

    #[test]
    fn box_is_dropped_when_record_allocation_fails() {
        let drops = Rc::new(Cell::new(0));
        fail_next_allocation();
        let res = SharedPtr::try_from_nullable(Some(Box::new(Flag(drops.clone()))));
        let err = res.err().expect("failpoint");
        assert_eq!(drops.get(), 1);
        assert!(err.to_string().contains("bookkeeping record"));
    }

    #[test]
    fn failed_allocation_leaves_no_ownership() {
        let before = live_records();
        fail_next_allocation();
        assert!(SharedPtr::<u8>::try_from_nullable(None).is_err());
        assert_eq!(live_records(), before);
        // The failpoint is one-shot.
        let p = SharedPtr::<u8>::try_from_nullable(None).expect("allocation");
        assert_eq!(p.use_count(), 1);
        drop(p);
        assert_eq!(live_records(), before);
    }

    struct SelfObserving {
        me: RefCell<WeakPtr<SelfObserving>>,
        drops: Rc<Cell<u32>>,
    }

    impl Drop for SelfObserving {
        fn drop(&mut self) {
            // The object is gone by now; promotion must fail.
            assert!(self.me.borrow().lock().is_null());
            self.drops.set(self.drops.get() + 1);
        }
    }

    // Test: a payload holding the only weak handle to its own record.
    // Verifies: destroying the payload drops that handle without freeing the
    // record mid-destruction; the record is freed exactly once afterwards.
    #[test]
    fn payload_holding_its_own_weak_handle() {
        let before = live_records();
        let drops = Rc::new(Cell::new(0));
        for p in [
            make_shared(SelfObserving {
                me: RefCell::new(WeakPtr::new()),
                drops: drops.clone(),
            }),
            SharedPtr::new(SelfObserving {
                me: RefCell::new(WeakPtr::new()),
                drops: drops.clone(),
            }),
        ] {
            *p.me.borrow_mut() = SharedPtr::downgrade(&p);
            assert_eq!(p.weak_count(), 1);
            drop(p);
        }
        assert_eq!(drops.get(), 2);
        assert_eq!(live_records(), before);
    }

    #[test]
    fn records_are_freed_after_the_last_weak_handle() {
        let before = live_records();
        let p = SharedPtr::new(5i32);
        let w = SharedPtr::downgrade(&p);
        drop(p);
        assert_eq!(live_records(), before + 1);
        drop(w);
        assert_eq!(live_records(), before);
    }

    #[test]
    #[should_panic(expected = "dereferenced a null SharedPtr")]
    fn deref_of_null_panics() {
        let p = SharedPtr::<i32>::null();
        let _v: i32 = *p;
    }
}
