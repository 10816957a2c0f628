use crate::{Part, TransferError};

/// Uniform part size for a file split across `url_count` URLs.
///
/// `max_part_size == 0` means the server imposes no upper bound.
pub fn part_size(
    file_size: u64,
    min_part_size: u64,
    max_part_size: u64,
    url_count: usize,
) -> Result<u64, TransferError> {
    if url_count == 0 {
        return Err(TransferError::InvalidPartPlan(
            "server issued no upload URLs".into(),
        ));
    }
    let urls = url_count as u64;

    if max_part_size > 0 {
        let needed = file_size.div_ceil(max_part_size);
        if needed > urls {
            return Err(TransferError::InvalidPartPlan(format!(
                "more parts required than URLs available: {needed} parts of at most \
                 {max_part_size} bytes, {urls} URLs"
            )));
        }
    }

    if file_size < min_part_size {
        if url_count != 1 {
            return Err(TransferError::InvalidPartPlan(format!(
                "file of {file_size} bytes is below the minimum part size \
                 {min_part_size} but {urls} URLs were issued"
            )));
        }
        return Ok(file_size);
    }

    let size = file_size.div_ceil(urls);
    Ok(size.max(min_part_size))
}

/// Splits a file into exactly `urls.len()` ascending parts, part *i* bound to URL *i*.
///
/// When the uniform size (raised to the minimum) covers the file in fewer
/// parts than there are URLs, the surplus trailing parts are the empty range
/// `[file_size, file_size)`. The last part always ends at `file_size`.
pub fn plan_parts(
    file_size: u64,
    min_part_size: u64,
    max_part_size: u64,
    urls: &[String],
) -> Result<Vec<Part>, TransferError> {
    let size = part_size(file_size, min_part_size, max_part_size, urls.len())?;

    let parts = urls
        .iter()
        .enumerate()
        .map(|(index, url)| {
            let i = index as u64;
            let start = i.saturating_mul(size).min(file_size);
            let end = (i + 1).saturating_mul(size).min(file_size);
            Part {
                index,
                start,
                end,
                url: url.clone(),
            }
        })
        .collect();
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://blob.example/part{i}")).collect()
    }

    fn ranges(parts: &[Part]) -> Vec<(u64, u64)> {
        parts.iter().map(|p| (p.start, p.end)).collect()
    }

    #[test]
    fn uniform_split_rounds_up() {
        assert_eq!(part_size(1000, 100, 0, 3).unwrap(), 334);
        let parts = plan_parts(1000, 100, 0, &urls(3)).unwrap();
        assert_eq!(ranges(&parts), vec![(0, 334), (334, 668), (668, 1000)]);
        assert_eq!(parts[2].url, "https://blob.example/part2");
    }

    #[test]
    fn too_few_urls_for_max_part_size() {
        let err = plan_parts(1000, 0, 200, &urls(4)).unwrap_err();
        assert!(matches!(err, TransferError::InvalidPartPlan(_)));
        // Five URLs is exactly enough.
        let parts = plan_parts(1000, 0, 200, &urls(5)).unwrap();
        assert_eq!(parts.len(), 5);
        assert!(parts.iter().all(|p| p.len() == 200));
    }

    #[test]
    fn small_file_single_part() {
        let parts = plan_parts(50, 100, 0, &urls(1)).unwrap();
        assert_eq!(ranges(&parts), vec![(0, 50)]);
    }

    #[test]
    fn small_file_with_two_urls_is_rejected() {
        let err = plan_parts(50, 100, 0, &urls(2)).unwrap_err();
        assert!(matches!(err, TransferError::InvalidPartPlan(_)));
    }

    #[test]
    fn no_urls_is_rejected() {
        assert!(matches!(
            plan_parts(10, 0, 0, &[]),
            Err(TransferError::InvalidPartPlan(_))
        ));
    }

    #[test]
    fn zero_byte_file() {
        let parts = plan_parts(0, 0, 0, &urls(1)).unwrap();
        assert_eq!(ranges(&parts), vec![(0, 0)]);
        let parts = plan_parts(0, 10, 100, &urls(1)).unwrap();
        assert_eq!(ranges(&parts), vec![(0, 0)]);
    }

    #[test]
    fn min_part_size_leaves_empty_trailing_parts() {
        // 1000 / 4 = 250, raised to 400: three parts cover the file.
        let parts = plan_parts(1000, 400, 0, &urls(4)).unwrap();
        assert_eq!(
            ranges(&parts),
            vec![(0, 400), (400, 800), (800, 1000), (1000, 1000)]
        );
        assert!(parts[3].is_empty());
    }

    #[test]
    fn min_part_size_far_above_uniform_size() {
        // 1000 / 10 = 100, raised to 600: only two parts carry data.
        let parts = plan_parts(1000, 600, 0, &urls(10)).unwrap();
        assert_eq!(parts.len(), 10);
        assert_eq!(ranges(&parts[..2]), vec![(0, 600), (600, 1000)]);
        assert!(parts[2..].iter().all(|p| p.start == 1000 && p.end == 1000));
    }

    #[test]
    fn plan_invariants_hold_across_grid() {
        let sizes = [0u64, 1, 7, 99, 100, 101, 999, 1000, 1001, 4096, 65_537];
        let mins = [0u64, 1, 10, 100, 1000];
        let maxes = [0u64, 50, 100, 1000, 100_000];
        for &size in &sizes {
            for &min in &mins {
                for &max in &maxes {
                    for count in 1..=8 {
                        let Ok(parts) = plan_parts(size, min, max, &urls(count)) else {
                            continue;
                        };
                        assert_eq!(parts.len(), count, "size={size} min={min} max={max}");
                        let mut cursor = 0;
                        for (i, p) in parts.iter().enumerate() {
                            assert_eq!(p.index, i);
                            assert!(p.end >= p.start);
                            assert_eq!(p.start, cursor, "parts must be contiguous");
                            cursor = p.end;
                        }
                        assert_eq!(parts.last().unwrap().end, size);
                    }
                }
            }
        }
    }

    #[test]
    fn plan_is_repeatable() {
        let a = plan_parts(123_456, 1000, 50_000, &urls(5)).unwrap();
        let b = plan_parts(123_456, 1000, 50_000, &urls(5)).unwrap();
        assert_eq!(a, b);
    }
}
