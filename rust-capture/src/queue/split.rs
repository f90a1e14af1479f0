//! Partitioning of work items across parallel queues.

/// Split `items` into at most `n` contiguous partitions of near-equal size.
///
/// The remainder is spread one item each over the leading partitions, so
/// partition 0 is never smaller than any other and no partition holds more
/// than `ceil(len / n)` items. Empty partitions are skipped and `n == 0` is
/// treated as one partition.
pub fn split<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let n = n.max(1);
    let len = items.len();
    let base = len / n;
    let remainder = len % n;

    let mut partitions = Vec::with_capacity(n.min(len));
    let mut iter = items.into_iter();

    for index in 0..n {
        let size = base + usize::from(index < remainder);
        if size == 0 {
            break;
        }
        partitions.push(iter.by_ref().take(size).collect());
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(10, 3, vec![4, 3, 3])]
    #[case(10, 1, vec![10])]
    #[case(2, 5, vec![1, 1])]
    #[case(0, 4, vec![])]
    #[case(7, 0, vec![7])]
    #[case(9, 3, vec![3, 3, 3])]
    #[case(11, 4, vec![3, 3, 3, 2])]
    fn test_partition_sizes(#[case] len: usize, #[case] n: usize, #[case] expected: Vec<usize>) {
        let parts = split((0..len).collect::<Vec<_>>(), n);
        let sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
        assert_eq!(sizes, expected);
    }

    #[test]
    fn test_concatenation_preserves_order() {
        for len in 0..40usize {
            for n in 0..12usize {
                let items: Vec<usize> = (0..len).collect();
                let parts = split(items.clone(), n);
                let bound = len.div_ceil(n.max(1)) + 1;

                assert!(parts.iter().all(|p| !p.is_empty() && p.len() <= bound));
                assert_eq!(parts.concat(), items, "len={len} n={n}");
            }
        }
    }
}
