//! Size classes for the general-purpose object router.
//!
//! Classes run from 8 bytes to 8KB: powers of two plus the 96 and 192 byte
//! classes that cover common structure sizes. Requests above
//! [`MAX_SMALL_SIZE`] bypass the caches and take whole pages.

use crate::backend::{PAGE_SHIFT, PAGE_SIZE};

/// Smallest class.
pub const MIN_SIZE: usize = 8;

/// Largest request served from a class cache.
pub const MAX_SMALL_SIZE: usize = 8 * 1024;

/// Number of classes.
pub const NUM_SIZE_CLASSES: usize = 13;

const SIZE_TABLE: [usize; NUM_SIZE_CLASSES] = [
    8, 16, 32, 64, 96, 128, 192, 256, 512, 1024, 2048, 4096, 8192,
];

/// Class index for `size`, or `NUM_SIZE_CLASSES` for the page path.
#[must_use]
pub fn bin_index(size: usize) -> usize {
    let size = size.max(MIN_SIZE);
    if size > MAX_SMALL_SIZE {
        return NUM_SIZE_CLASSES;
    }
    SIZE_TABLE
        .iter()
        .position(|&class| size <= class)
        .unwrap_or(NUM_SIZE_CLASSES)
}

/// Object size of a class; 0 when out of range.
#[must_use]
pub fn bin_size(index: usize) -> usize {
    SIZE_TABLE.get(index).copied().unwrap_or(0)
}

/// Cache name of a class: `kmalloc-64`, `kmalloc-1k`, ...
#[must_use]
pub fn class_name(prefix: &str, index: usize) -> String {
    let size = bin_size(index);
    if size >= 1024 && size % 1024 == 0 {
        format!("{prefix}-{}k", size / 1024)
    } else {
        format!("{prefix}-{size}")
    }
}

/// Alignment of a class: natural for powers of two up to a page.
#[must_use]
pub fn class_align(index: usize) -> usize {
    let size = bin_size(index);
    if size.is_power_of_two() {
        size.min(PAGE_SIZE)
    } else {
        MIN_SIZE
    }
}

/// Smallest order whose block holds `size` bytes.
#[must_use]
pub fn pages_order(size: usize) -> u32 {
    let pages = size.div_ceil(PAGE_SIZE).max(1);
    pages.next_power_of_two().trailing_zeros()
}

/// Bytes in a block of `order`.
#[must_use]
pub const fn order_bytes(order: u32) -> usize {
    1 << (PAGE_SHIFT + order)
}
