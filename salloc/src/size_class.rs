//! Size classes for the segregated free lists.
//!
//! Class `i` holds blocks of `2^(i+4) + 1 ..= 2^(i+5)` bytes, except that class 0 starts at the
//! minimum block size and the last class is unbounded.
//!
//! | index | block size       |
//! |-------|------------------|
//! | 0     | 24 - 32          |
//! | 1     | 33 - 64          |
//! | 2     | 65 - 128         |
//! | 3     | 129 - 256        |
//! | 4     | 257 - 512        |
//! | 5     | 513 - 1024       |
//! | 6     | 1025 - 2048      |
//! | 7     | 2049 - 4096      |
//! | 8     | 4097 and up      |

use crate::block::MIN_BLOCK_SIZE;

/// Number of free lists.
pub const NUM_SIZE_CLASSES: usize = 9;

/// Upper bound of class 0.
const SMALLEST_CLASS: usize = 32;

/// Returns the class a block of `size` bytes belongs to.
pub const fn index_for(size: usize) -> usize {
    let mut size = size.saturating_sub(1) >> SMALLEST_CLASS.trailing_zeros();
    let mut index = 0;
    while size != 0 && index < NUM_SIZE_CLASSES - 1 {
        size >>= 1;
        index += 1;
    }
    index
}

/// Inclusive range of block sizes in a class. The last class has no upper bound.
pub const fn class_range(index: usize) -> (usize, Option<usize>) {
    assert!(index < NUM_SIZE_CLASSES, "size class out of range");
    let lower = if index == 0 {
        MIN_BLOCK_SIZE
    } else {
        (SMALLEST_CLASS << (index - 1)) + 1
    };
    let upper = if index == NUM_SIZE_CLASSES - 1 {
        None
    } else {
        Some(SMALLEST_CLASS << index)
    };
    (lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_boundaries() {
        let table = [
            (24, 0),
            (32, 0),
            (33, 1),
            (64, 1),
            (65, 2),
            (128, 2),
            (129, 3),
            (256, 3),
            (257, 4),
            (512, 4),
            (513, 5),
            (1024, 5),
            (1025, 6),
            (2048, 6),
            (2049, 7),
            (4096, 7),
            (4097, 8),
            (1 << 20, 8),
            (usize::MAX, 8),
        ];
        for (size, class) in table {
            assert_eq!(index_for(size), class, "size {size}");
        }
    }

    #[test]
    fn test_class_range_matches_index() {
        for class in 0..NUM_SIZE_CLASSES {
            let (lower, upper) = class_range(class);
            assert_eq!(index_for(lower), class);
            if let Some(upper) = upper {
                assert_eq!(index_for(upper), class);
                assert_eq!(index_for(upper + 1), class + 1);
            }
        }
        assert_eq!(class_range(0), (24, Some(32)));
        assert_eq!(class_range(8), (4097, None));
    }
}
