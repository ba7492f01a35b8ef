//! Deletion strategies: the closed set of ways a record disposes of the
//! object it manages.
//!
//! Each strategy is the payload stored after a record's header. `destroy`
//! runs the strategy once; for the two strategies that point at a separate
//! object, dropping a payload that was never destroyed runs it as well, which
//! is how an allocation failure disposes of the caller's object.

use core::mem::MaybeUninit;
use core::ptr::NonNull;

/// Which deletion strategy a record was built with.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Strategy {
    /// The object lives in its own `Box` and is dropped through it.
    Default,
    /// The object is handed to a user-supplied deleter.
    Custom,
    /// The object lives inside the record and is dropped in place.
    InPlace,
}

pub(crate) trait DestroyPayload {
    const STRATEGY: Strategy;

    /// Destroy the managed object, leaving the payload's own storage intact.
    ///
    /// # Safety
    /// Called at most once per record. For `InPlace` the value must have
    /// been initialized.
    unsafe fn destroy(&mut self);
}

/// Owning pointer to a boxed object; nothing to do for a null pointer.
pub(crate) struct DefaultDelete<T: ?Sized> {
    ptr: Option<NonNull<T>>,
}

impl<T: ?Sized> DefaultDelete<T> {
    pub(crate) fn from_box(value: Option<Box<T>>) -> Self {
        Self {
            ptr: value.map(|b| NonNull::from(Box::leak(b))),
        }
    }

    /// # Safety
    /// `ptr` is null or was produced by `Box::into_raw` and is not owned by
    /// anything else.
    pub(crate) unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            ptr: NonNull::new(ptr),
        }
    }

    pub(crate) fn target(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    fn run(&mut self) {
        if let Some(p) = self.ptr.take() {
            // SAFETY: constructors only admit pointers that own a Box.
            drop(unsafe { Box::from_raw(p.as_ptr()) });
        }
    }
}

impl<T: ?Sized> DestroyPayload for DefaultDelete<T> {
    const STRATEGY: Strategy = Strategy::Default;

    unsafe fn destroy(&mut self) {
        self.run();
    }
}

impl<T: ?Sized> Drop for DefaultDelete<T> {
    fn drop(&mut self) {
        self.run();
    }
}

/// Pointer plus the deleter that disposes of it.
pub(crate) struct CustomDelete<T: ?Sized, D>
where
    D: FnOnce(NonNull<T>),
{
    ptr: Option<NonNull<T>>,
    deleter: Option<D>,
}

impl<T: ?Sized, D> CustomDelete<T, D>
where
    D: FnOnce(NonNull<T>),
{
    pub(crate) fn new(ptr: *mut T, deleter: D) -> Self {
        Self {
            ptr: NonNull::new(ptr),
            deleter: Some(deleter),
        }
    }

    pub(crate) fn target(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    fn run(&mut self) {
        // A null target never reaches the deleter; the deleter is just dropped.
        let deleter = self.deleter.take();
        if let (Some(p), Some(deleter)) = (self.ptr.take(), deleter) {
            deleter(p);
        }
    }
}

impl<T: ?Sized, D> DestroyPayload for CustomDelete<T, D>
where
    D: FnOnce(NonNull<T>),
{
    const STRATEGY: Strategy = Strategy::Custom;

    unsafe fn destroy(&mut self) {
        self.run();
    }
}

impl<T: ?Sized, D> Drop for CustomDelete<T, D>
where
    D: FnOnce(NonNull<T>),
{
    fn drop(&mut self) {
        self.run();
    }
}

/// Storage for a value embedded in the record itself.
#[repr(transparent)]
pub(crate) struct InPlace<T>(MaybeUninit<T>);

impl<T> InPlace<T> {
    pub(crate) fn uninit() -> Self {
        Self(MaybeUninit::uninit())
    }
}

impl<T> DestroyPayload for InPlace<T> {
    const STRATEGY: Strategy = Strategy::InPlace;

    unsafe fn destroy(&mut self) {
        // SAFETY: caller guarantees the value was initialized and is dropped once.
        unsafe { self.0.assume_init_drop() }
    }
}
