//! shared-ptr: single-threaded shared-ownership pointers with weak
//! observers, pluggable deletion, aliasing and combined allocation.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a `SharedPtr<T>` / `WeakPtr<T>` pair whose ownership protocol is
//!   small enough to check by reading, layered so each piece has one job.
//! - Layers:
//!   - tokens: typed `Cell` counters that hand out linear, zero-sized
//!     tokens; a token must be returned to a counter of its kind.
//!   - strategy: the closed set of deletion strategies (boxed object,
//!     custom deleter, value embedded in the record).
//!   - record: the bookkeeping record (header with both counts plus one
//!     strategy payload) and the counted handles `StrongRef` / `WeakRef`,
//!     the only code that moves a count.
//!   - SharedPtr / WeakPtr: public handles pairing an optional counted
//!     handle with an optional access pointer.
//!   - make_shared: builds the record and the value in one allocation.
//!
//! Ownership protocol
//! - The object dies when the strong count reaches zero, inside the drop,
//!   reset or reassignment that returned the last strong unit.
//! - The record is freed when both counts are zero. While the object is
//!   being destroyed the record pins itself with a weak unit, so a value
//!   that owns the last `WeakPtr` to itself cannot free the record early.
//! - Every share path acquires the new unit before releasing the old one.
//!
//! Aliasing and conversions
//! - The access pointer is independent of the record. `SharedPtr::map`
//!   projects to anything borrowed from the target (fields, `dyn Trait`
//!   views); `SharedPtr::aliasing` exposes an arbitrary pointer under the
//!   donor's lifetime. Equality compares access pointers only.
//! - Owning constructors require `'static` types: the record is type-erased
//!   and may outlive every handle whose `T` names the owned type.
//!
//! Constraints
//! - Single-threaded: handles are `!Send`/`!Sync` (no atomics). A
//!   multithreaded variant would need atomic counts and a
//!   compare-and-increment-if-nonzero `lock`.
//! - Count overflow aborts, matching `Rc`.
//! - Dereferencing a null `SharedPtr` panics.
//!
//! Notes and non-goals
//! - No array variants, no custom allocators for records, no intrusive
//!   counting.

mod error;
mod make_shared;
mod record;
mod shared_ptr;
mod strategy;
pub mod tokens;
mod weak_ptr;

// Public surface
pub use error::AllocError;
pub use make_shared::{make_shared, make_shared_with, try_make_shared};
pub use shared_ptr::SharedPtr;
pub use strategy::Strategy;
pub use weak_ptr::WeakPtr;
