//! Fixed-capacity circular sample stores.
//!
//! Every time series the processor keeps (colour means, combined channel,
//! normalised signal, frame periods, breath series) lives in a `RingBuffer`
//! allocated once at construction. Each ring owns its own modulus, so an
//! index computed for one history can never be applied to another.

/// Loop an offset into `[0, length)`.
///
/// Matches `((length + (offset mod length)) mod length)`, so negative offsets
/// wrap backwards from the end instead of following the sign of `%`.
#[inline]
pub fn wrap(offset: i64, length: usize) -> usize {
    debug_assert!(length > 0, "wrap with zero length");
    offset.rem_euclid(length as i64) as usize
}

/// Circular buffer of `f64` samples.
///
/// `push` writes at the cursor and advances it by one slot, overwriting the
/// oldest value once the ring is full.
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer {
    values: Vec<f64>,
    cursor: usize,
    filled: usize,
}

impl RingBuffer {
    /// Create a zero-filled ring.
    ///
    /// # Panics
    /// If `length` is zero. Lengths come from a validated `ProcessorConfig`.
    pub fn new(length: usize) -> Self {
        assert!(length > 0, "RingBuffer length must be > 0");
        Self {
            values: vec![0.0; length],
            cursor: 0,
            filled: 0,
        }
    }

    /// Capacity of the ring.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Number of slots written so far, saturating at `len()`.
    #[inline]
    pub fn filled(&self) -> usize {
        self.filled
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.filled == self.values.len()
    }

    /// Slot the next `push` will write.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn push(&mut self, value: f64) {
        self.values[self.cursor] = value;
        self.cursor = wrap(self.cursor as i64 + 1, self.values.len());
        if self.filled < self.values.len() {
            self.filled += 1;
        }
    }

    /// Value at a signed offset from the cursor (`-1` is the newest sample).
    #[inline]
    pub fn at(&self, offset: i64) -> f64 {
        self.values[wrap(self.cursor as i64 + offset, self.values.len())]
    }

    /// Value written `back` pushes ago (`0` is the newest sample).
    #[inline]
    pub fn back(&self, back: usize) -> f64 {
        self.at(-1 - back as i64)
    }

    /// Most recent value, `0.0` before the first push.
    #[inline]
    pub fn latest(&self) -> f64 {
        if self.filled == 0 {
            0.0
        } else {
            self.back(0)
        }
    }

    /// Copy the newest `out.len()` values into `out`, oldest first.
    pub fn copy_latest(&self, out: &mut [f64]) {
        let n = out.len();
        debug_assert!(n <= self.values.len());
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.at(i as i64 - n as i64);
        }
    }

    /// Newest `n` values, oldest first.
    pub fn latest_vec(&self, n: usize) -> Vec<f64> {
        let mut out = vec![0.0; n.min(self.values.len())];
        self.copy_latest(&mut out);
        out
    }

    /// Sum of the newest `n` values.
    pub fn sum_latest(&self, n: usize) -> f64 {
        (0..n.min(self.values.len())).map(|i| self.back(i)).sum()
    }

    /// Mean and sample standard deviation of the newest `n` values.
    ///
    /// `n` is clamped to the filled part of the ring. Returns `(0, 0)` when
    /// nothing has been written; the deviation is `0` for a single value.
    pub fn mean_sko(&self, n: usize) -> (f64, f64) {
        let n = n.min(self.filled);
        if n == 0 {
            return (0.0, 0.0);
        }
        let mean = self.sum_latest(n) / n as f64;
        if n < 2 {
            return (mean, 0.0);
        }
        let var = (0..n)
            .map(|i| (self.back(i) - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        (mean, var.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wrap_negative_offsets() {
        assert_eq!(wrap(-1, 9), 8);
        assert_eq!(wrap(-9, 9), 0);
        assert_eq!(wrap(-10, 9), 8);
        assert_eq!(wrap(9, 9), 0);
        assert_eq!(wrap(-1, 221), 220);
    }

    #[test]
    fn test_push_overwrites_oldest() {
        let mut ring = RingBuffer::new(3);
        assert!(ring.is_empty());
        for v in [1.0, 2.0, 3.0, 4.0] {
            ring.push(v);
        }
        assert!(ring.is_full());
        assert_eq!(ring.latest(), 4.0);
        assert_eq!(ring.back(2), 2.0);
        assert_eq!(ring.latest_vec(3), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_separate_domains_do_not_mix() {
        // same history pushed into rings of different moduli
        let mut data = RingBuffer::new(221);
        let mut filter = RingBuffer::new(9);
        for i in 0..230 {
            data.push(i as f64);
            filter.push(i as f64);
        }
        assert_eq!(data.back(0), filter.back(0));
        assert_eq!(data.back(8), filter.back(8));
        assert_eq!(filter.back(9), filter.back(0));
        assert_eq!(data.cursor(), 230 % 221);
        assert_eq!(filter.cursor(), 230 % 9);
    }

    #[test]
    fn test_mean_sko_partial_fill() {
        let mut ring = RingBuffer::new(15);
        assert_eq!(ring.mean_sko(15), (0.0, 0.0));
        ring.push(2.0);
        assert_eq!(ring.mean_sko(15), (2.0, 0.0));
        ring.push(4.0);
        let (mean, sko) = ring.mean_sko(15);
        approx::assert_relative_eq!(mean, 3.0);
        approx::assert_relative_eq!(sko, std::f64::consts::SQRT_2, epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn test_wrap_in_range(offset in -100_000i64..100_000, len in 1usize..1024) {
            let idx = wrap(offset, len);
            prop_assert!(idx < len);
            prop_assert_eq!(idx, wrap(offset + len as i64, len));
        }

        #[test]
        fn test_copy_latest_is_ordered(len in 1usize..64, pushes in 0usize..200) {
            let mut ring = RingBuffer::new(len);
            for i in 0..pushes {
                ring.push(i as f64);
            }
            let n = ring.filled();
            let window = ring.latest_vec(n);
            for pair in window.windows(2) {
                prop_assert_eq!(pair[1] - pair[0], 1.0);
            }
        }
    }
}
