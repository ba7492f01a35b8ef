//! WeakPtr: the observing handle.

use crate::record::WeakRef;
use crate::shared_ptr::SharedPtr;
use core::fmt;
use core::ptr::NonNull;

/// Non-owning observer of a `SharedPtr`'s record.
///
/// Keeps the record allocated but never the object; `lock` is the only way
/// back to ownership.
pub struct WeakPtr<T: ?Sized> {
    record: Option<WeakRef>,
    ptr: Option<NonNull<T>>,
}

impl<T: ?Sized> WeakPtr<T> {
    /// An observer of nothing; `lock()` always yields a null pointer.
    pub const fn new() -> Self {
        Self {
            record: None,
            ptr: None,
        }
    }

    pub(crate) fn from_parts(record: Option<WeakRef>, ptr: Option<NonNull<T>>) -> Self {
        Self { record, ptr }
    }

    /// Promote to an owner, or return an empty pointer if the object is gone.
    pub fn lock(&self) -> SharedPtr<T> {
        self.upgrade().unwrap_or_default()
    }

    pub fn upgrade(&self) -> Option<SharedPtr<T>> {
        let record = self.record.as_ref()?.upgrade()?;
        Some(SharedPtr::from_parts(Some(record), self.ptr))
    }

    /// Convert the access pointer without touching the target, e.g. to a
    /// `dyn Trait` view. Works on expired observers; the weak unit moves over
    /// unchanged. A null access pointer stays null and `f` is not called.
    ///
    /// # Safety
    /// `f` must not dereference its argument (the target may be gone), and
    /// the pointer it returns must address memory owned by the same record,
    /// valid for as long as the target is alive.
    pub unsafe fn map_ptr<U: ?Sized, F>(this: Self, f: F) -> WeakPtr<U>
    where
        F: FnOnce(NonNull<T>) -> NonNull<U>,
    {
        let WeakPtr { record, ptr } = this;
        WeakPtr::from_parts(record, ptr.map(f))
    }

    pub fn use_count(&self) -> usize {
        self.record.as_ref().map_or(0, WeakRef::strong_count)
    }

    pub fn weak_count(&self) -> usize {
        self.record.as_ref().map_or(0, WeakRef::weak_count)
    }

    /// True when no owner is left (or there never was a record).
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }

    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(self, other);
    }

    /// True iff both observers share one record (or both have none).
    pub fn owner_eq<U: ?Sized>(&self, other: &WeakPtr<U>) -> bool {
        self.record.as_ref().map(WeakRef::as_ptr) == other.record.as_ref().map(WeakRef::as_ptr)
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        Self::from_parts(self.record.clone(), self.ptr)
    }

    fn clone_from(&mut self, source: &Self) {
        if self.owner_eq(source) {
            self.ptr = source.ptr;
        } else {
            *self = source.clone();
        }
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(p: &SharedPtr<T>) -> Self {
        SharedPtr::downgrade(p)
    }
}

impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPtr")
            .field("use_count", &self.use_count())
            .field("weak_count", &self.weak_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::WeakPtr;
    use crate::shared_ptr::SharedPtr;

    #[test]
    fn clone_from_same_record_keeps_counts() {
        let p = SharedPtr::new(1u32);
        let mut a = SharedPtr::downgrade(&p);
        let b = a.clone();
        assert_eq!(p.weak_count(), 2);
        a.clone_from(&b);
        assert_eq!(p.weak_count(), 2);
        assert!(a.owner_eq(&b));
    }

    #[test]
    fn expired_tracks_the_owner() {
        let mut p = SharedPtr::new(1u32);
        let w = WeakPtr::from(&p);
        assert!(!w.expired());
        assert_eq!(w.use_count(), 1);
        p.reset();
        assert!(w.expired());
        assert!(w.upgrade().is_none());
        assert!(WeakPtr::<u32>::new().expired());
    }
}
