//! Wrapping sequence generator.
//!
//! Backs sender contexts, connected sequence counts, connection ids and
//! Modbus transaction ids.

/// Wrapping numeric generator.
///
/// Emits `start, start + 1, ...` up to `modulus - 1`, then wraps to the
/// configured wrap value (0 unless built with [`SequenceCounter::with_initial`]).
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u64,
    wrap_to: u64,
    modulus: u64,
}

impl SequenceCounter {
    /// Create a counter over `0..modulus` starting at 0.
    ///
    /// # Panics
    ///
    /// Panics if `modulus` is zero.
    pub fn new(modulus: u64) -> Self {
        Self::with_initial(0, modulus)
    }

    /// Create a counter that starts at and wraps back to `initial`.
    ///
    /// # Panics
    ///
    /// Panics if `initial >= modulus`.
    pub fn with_initial(initial: u64, modulus: u64) -> Self {
        assert!(initial < modulus, "counter initial value must be below its modulus");
        Self {
            next: initial,
            wrap_to: initial,
            modulus,
        }
    }

    /// Create a counter that starts at `start` but wraps to 0.
    ///
    /// `start` is reduced modulo `modulus`, so any seed value is accepted.
    ///
    /// # Panics
    ///
    /// Panics if `modulus` is zero.
    pub fn starting_at(start: u64, modulus: u64) -> Self {
        assert!(modulus > 0, "counter modulus must be nonzero");
        Self {
            next: start % modulus,
            wrap_to: 0,
            modulus,
        }
    }

    /// Return the current value and advance.
    pub fn next(&mut self) -> u64 {
        let value = self.next;
        self.next += 1;
        if self.next >= self.modulus {
            self.next = self.wrap_to;
        }
        value
    }

    /// Value the next call to [`next`](Self::next) returns.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Counter modulus.
    pub fn modulus(&self) -> u64 {
        self.modulus
    }
}
