//! Typed counters and linear count tokens.
//!
//! Tokens are zero-sized proofs that a unit was acquired from a counter of
//! a particular kind. Dropping a token panics; the only valid way to
//! dispose of it is to return it to a counter of the same kind via
//! `Count::put`. Strong and weak units are distinct token types, so a weak
//! unit can never be returned to a strong counter.

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;

/// Zero-sized, linear token tied to its originating counter kind via lifetime.
pub struct Token<'a, C: ?Sized> {
    // Lifetime is tracked separately from the counter type to avoid
    // imposing `'a` bounds on `C`.
    _lt: PhantomData<&'a ()>,
    _ctr: PhantomData<*const C>,
}

impl<'a, C: ?Sized> Token<'a, C> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            _lt: PhantomData,
            _ctr: PhantomData,
        }
    }
}

impl<'a, C: ?Sized> Drop for Token<'a, C> {
    fn drop(&mut self) {
        // Intentional fail-fast on misuse: token must be consumed by Count::put.
        panic!("Token dropped without Count::put");
    }
}

impl<'a, C: ?Sized> fmt::Debug for Token<'a, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token")
    }
}

/// A source of counted units, enforced by linear Token flow.
pub trait Count {
    /// The token type minted by this counter.
    type Token<'a>: Sized
    where
        Self: 'a;

    /// Acquire one counted unit and return a linear token for it.
    ///
    /// Tokens are minted with a `'static` lifetime parameter so they can be
    /// stored inside handles; they are covariantly shortened when returned.
    fn get(&self) -> Self::Token<'static>;

    /// Return (consume) a previously acquired token.
    /// Returns true if the count is now zero.
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool;

    /// Snapshot of the current count.
    fn current(&self) -> usize;
}

/// Marker for counters of owning units.
#[derive(Debug)]
pub enum Strong {}

/// Marker for counters of observing units.
#[derive(Debug)]
pub enum Weak {}

/// Single-threaded counter of one kind of unit.
pub struct Counter<K> {
    count: Cell<usize>,
    _kind: PhantomData<K>,
}

impl<K> Counter<K> {
    pub const fn new(initial: usize) -> Self {
        Self {
            count: Cell::new(initial),
            _kind: PhantomData,
        }
    }
}

impl<K> fmt::Debug for Counter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.count.get()).finish()
    }
}

impl<K: 'static> Count for Counter<K> {
    type Token<'a>
        = Token<'a, Self>
    where
        Self: 'a;

    #[inline]
    fn get(&self) -> Self::Token<'static> {
        let c = self.count.get();
        let n = c.wrapping_add(1);
        self.count.set(n);
        if n == 0 {
            // Follow Rc semantics: abort on overflow rather than continue unsafely.
            std::process::abort();
        }
        Token::<'static, Self>::new()
    }

    #[inline]
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool {
        // Consume first so an underflow panic does not also drop the token.
        core::mem::forget(t);
        let c = self.count.get();
        assert!(c > 0, "Counter underflow");
        let n = c - 1;
        self.count.set(n);
        n == 0
    }

    #[inline]
    fn current(&self) -> usize {
        self.count.get()
    }
}

#[cfg(test)]
mod tests {
    use super::{Count, Counter, Strong, Weak};

    #[test]
    fn get_and_put_track_the_count() {
        let c = Counter::<Strong>::new(0);
        let t1 = c.get();
        let t2 = c.get();
        assert_eq!(c.current(), 2);
        assert!(!c.put(t1));
        assert!(c.put(t2));
        assert_eq!(c.current(), 0);
    }

    #[test]
    fn dropping_a_token_panics() {
        let c = Counter::<Weak>::new(0);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let t = c.get();
            drop(t);
        }));
        assert!(res.is_err(), "expected a dropped token to panic");
    }

    #[test]
    fn put_past_zero_panics() {
        let source = Counter::<Strong>::new(0);
        let empty = Counter::<Strong>::new(0);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            // A token of the right kind, but minted by another counter.
            let stray = source.get();
            empty.put(stray);
        }));
        assert!(res.is_err(), "expected underflow to panic");
        assert_eq!(empty.current(), 0);
    }
}
