//! Bounded stacks of free object addresses.
//!
//! An `ArrayCache` is the unit of batching between a CPU and its node: the
//! per-CPU front caches and the per-node shared arrays are both instances.
//! Allocation pops the most recently freed (cache-hot) object; flushing
//! removes the oldest entries first.

/// Bounded LIFO of object addresses.
#[derive(Debug, Clone)]
pub struct ArrayCache {
    /// Stack of free object addresses, oldest first.
    entries: Vec<usize>,
    /// Maximum number of entries.
    limit: usize,
    /// Objects moved per refill or flush.
    batchcount: usize,
    /// Set by every pop or refill; cleared by the reaper.
    touched: bool,
}

impl ArrayCache {
    /// Creates an empty array holding at most `limit` objects.
    #[must_use]
    pub fn new(limit: usize, batchcount: usize) -> Self {
        Self {
            entries: Vec::with_capacity(limit),
            limit,
            batchcount,
            touched: false,
        }
    }

    /// Returns the number of cached objects.
    #[must_use]
    pub fn avail(&self) -> usize {
        self.entries.len()
    }

    /// Returns the capacity.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the number of objects moved per refill or flush.
    #[must_use]
    pub fn batchcount(&self) -> usize {
        self.batchcount
    }

    /// Free capacity.
    #[must_use]
    pub fn room(&self) -> usize {
        self.limit - self.entries.len()
    }

    /// Returns true if the array holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the array is at its limit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.limit
    }

    /// Pops the most recently pushed object.
    pub fn pop(&mut self) -> Option<usize> {
        let addr = self.entries.pop()?;
        self.touched = true;
        Some(addr)
    }

    /// Pushes an object.
    ///
    /// Returns `true` if the object was cached, `false` if the array is full.
    pub fn push(&mut self, addr: usize) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push(addr);
        true
    }

    /// Removes up to `n` of the oldest entries.
    pub fn take_oldest(&mut self, n: usize) -> Vec<usize> {
        let n = n.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    /// Moves up to `max` of the newest entries of `self` onto `dst`, bounded
    /// by the room in `dst`. Returns the number moved.
    pub fn transfer_to(&mut self, dst: &mut ArrayCache, max: usize) -> usize {
        let n = max.min(self.entries.len()).min(dst.room());
        if n == 0 {
            return 0;
        }
        let start = self.entries.len() - n;
        dst.entries.extend(self.entries.drain(start..));
        dst.touched = true;
        n
    }

    /// Moves up to `max` of the oldest entries of `self` onto `dst`, bounded
    /// by the room in `dst`. Returns the number moved.
    pub fn transfer_oldest_to(&mut self, dst: &mut ArrayCache, max: usize) -> usize {
        let n = max.min(self.entries.len()).min(dst.room());
        dst.entries.extend(self.entries.drain(..n));
        n
    }

    /// Removes every entry.
    pub fn drain(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.entries)
    }

    /// Marks the array as recently used.
    pub fn mark_touched(&mut self) {
        self.touched = true;
    }

    /// Clears the touched bit, returning its previous value.
    pub fn clear_touched(&mut self) -> bool {
        std::mem::replace(&mut self.touched, false)
    }

    /// Returns true if `addr` is cached here.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.entries.contains(&addr)
    }
}
