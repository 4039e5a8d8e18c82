//! Part geometry for segmented uploads.

use tracing::warn;

/// Smallest chunk size stores accept for non-final multipart parts (5 MiB).
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// One numbered byte range of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpan {
    /// 1-based part number.
    pub number: i32,
    /// Byte offset of the part within the file.
    pub offset: u64,
    /// Length of the part; only the final part may be shorter than the
    /// chunk size.
    pub len: u64,
}

/// Clamps a requested chunk size to the store minimum.
pub fn effective_chunk_size(requested: u64) -> u64 {
    if requested < MIN_CHUNK_SIZE {
        warn!(
            requested,
            adjusted = MIN_CHUNK_SIZE,
            "chunk size below store minimum, adjusting"
        );
        MIN_CHUNK_SIZE
    } else {
        requested
    }
}

/// Number of parts needed to cover `size` bytes.
pub fn part_count(size: u64, chunk: u64) -> u64 {
    size.div_ceil(chunk)
}

/// Splits `size` bytes into contiguous numbered spans of `chunk` bytes.
pub fn part_spans(size: u64, chunk: u64) -> Vec<PartSpan> {
    let mut spans = Vec::with_capacity(part_count(size, chunk) as usize);
    let mut offset = 0;
    let mut number = 1;
    while offset < size {
        let len = chunk.min(size - offset);
        spans.push(PartSpan {
            number,
            offset,
            len,
        });
        offset += len;
        number += 1;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn chunk_size_is_clamped_to_minimum() {
        assert_eq!(effective_chunk_size(0), MIN_CHUNK_SIZE);
        assert_eq!(effective_chunk_size(MIN_CHUNK_SIZE - 1), MIN_CHUNK_SIZE);
        assert_eq!(effective_chunk_size(MIN_CHUNK_SIZE), MIN_CHUNK_SIZE);
        assert_eq!(effective_chunk_size(8 * MIB), 8 * MIB);
    }

    #[test]
    fn part_count_rounds_up() {
        assert_eq!(part_count(25 * MIB, 5 * MIB), 5);
        assert_eq!(part_count(25 * MIB + 1, 5 * MIB), 6);
        assert_eq!(part_count(1, 5 * MIB), 1);
        assert_eq!(part_count(0, 5 * MIB), 0);
    }

    #[test]
    fn spans_are_contiguous_and_one_based() {
        let spans = part_spans(12 * MIB, 5 * MIB);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0], PartSpan { number: 1, offset: 0, len: 5 * MIB });
        assert_eq!(spans[1], PartSpan { number: 2, offset: 5 * MIB, len: 5 * MIB });
        assert_eq!(spans[2], PartSpan { number: 3, offset: 10 * MIB, len: 2 * MIB });
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let spans = part_spans(25 * MIB, 5 * MIB);
        assert_eq!(spans.len(), 5);
        assert!(spans.iter().all(|s| s.len == 5 * MIB));
        assert_eq!(spans.last().unwrap().offset, 20 * MIB);
    }

    #[test]
    fn empty_file_has_no_spans() {
        assert!(part_spans(0, 5 * MIB).is_empty());
    }
}
