use std::alloc::Layout;
use thiserror::Error;

/// The global allocator could not provide storage for a bookkeeping record.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error(
    "failed to allocate a {}-byte bookkeeping record (align {})",
    .layout.size(),
    .layout.align()
)]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    pub(crate) fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Layout of the record that could not be allocated.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}
