//! Splitting a request budget across parallel workers.

use std::ops::Range;

/// Split `0..total` into `parallelism` contiguous, non-overlapping ranges.
///
/// Every range but the last holds `total / parallelism` indices; the last
/// absorbs the remainder. When there are fewer requests than workers, the
/// empty leading ranges are dropped, so fewer ranges than `parallelism` may
/// be returned. A zero `parallelism` is treated as one.
pub fn partition(total: u64, parallelism: usize) -> Vec<Range<u64>> {
    let parallelism = parallelism.max(1) as u64;
    let group = total / parallelism;
    let mut ranges = Vec::with_capacity(parallelism as usize);

    let mut start = 0;
    for p in 1..=parallelism {
        let end = if p == parallelism { total } else { start + group };
        if end > start {
            ranges.push(start..end);
        }
        start = end;
    }

    ranges
}

/// Evenly split `total` across `workers`, handing the remainder to the
/// first workers one each. Every worker gets at least `min`.
pub fn share(total: u64, workers: usize, min: u64) -> Vec<u64> {
    let workers = workers.max(1) as u64;
    let base = total / workers;
    let remainder = total % workers;
    (0..workers)
        .map(|i| (base + u64::from(i < remainder)).max(min))
        .collect()
}

/// Describe a partitioning plan for logging.
pub fn describe_partitioning(ranges: &[Range<u64>]) -> String {
    let mut lines = Vec::new();
    lines.push("Request distribution:".to_string());
    for (i, range) in ranges.iter().enumerate() {
        lines.push(format!(
            "  worker-{}: {}..{} ({} requests)",
            i + 1,
            range.start,
            range.end,
            range.end - range.start
        ));
    }
    lines.join("\n")
}
