//! Combined allocation: the record and the managed value in one block.

use crate::error::AllocError;
use crate::record::{Header, Record, StrongRef};
use crate::shared_ptr::SharedPtr;
use crate::strategy::InPlace;
use core::ptr::NonNull;
use std::alloc;

/// Build `value` inside its own bookkeeping record.
pub fn make_shared<T: 'static>(value: T) -> SharedPtr<T> {
    make_shared_with(move || value)
}

/// Allocate the record first, then run `init` to produce the value stored in
/// it. If `init` panics the storage is released without dropping anything.
pub fn make_shared_with<T, F>(init: F) -> SharedPtr<T>
where
    T: 'static,
    F: FnOnce() -> T,
{
    match emplace::<T, AllocError>(move || Ok(init())) {
        Ok(p) => p,
        Err(err) => alloc::handle_alloc_error(err.layout()),
    }
}

/// Fallible `make_shared_with`: an `Err` from `init` (or failure to allocate
/// the record) is returned after the storage is released.
pub fn try_make_shared<T, E, F>(init: F) -> Result<SharedPtr<T>, E>
where
    T: 'static,
    E: From<AllocError>,
    F: FnOnce() -> Result<T, E>,
{
    emplace(init)
}

fn emplace<T, E>(init: impl FnOnce() -> Result<T, E>) -> Result<SharedPtr<T>, E>
where
    T: 'static,
    E: From<AllocError>,
{
    let header = Record::try_new(InPlace::<T>::uninit()).map_err(|(err, _)| err)?;
    let unwritten = Unwritten(header);
    let value = init()?;
    // SAFETY: the record was built for InPlace<T> and is still allocated.
    let slot = unsafe { Record::<InPlace<T>>::value_slot(header) };
    unsafe { slot.as_ptr().write(value) };
    core::mem::forget(unwritten);
    // SAFETY: the value is initialized; this is the record's first unit.
    let record = unsafe { StrongRef::acquire(header) };
    Ok(SharedPtr::from_parts(Some(record), Some(slot)))
}

/// Releases an in-place record whose value was never written.
struct Unwritten(NonNull<Header>);

impl Drop for Unwritten {
    fn drop(&mut self) {
        log::debug!("value construction failed; releasing record at {:p}", self.0);
        // SAFETY: no unit was handed out and the slot holds no value.
        unsafe { Header::discard(self.0) }
    }
}
