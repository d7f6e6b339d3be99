/// Differences between consecutive pulse times.
pub fn intervals(pulses: &[i64]) -> Vec<i64> {
    pulses.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Find the first offset in `haystack` where every element of `needle` is
/// within `tolerance` (exclusive) of the corresponding haystack element.
///
/// The search is greedy: the smallest matching offset is returned even if a
/// later offset fits more tightly. An empty needle never matches.
pub fn match_sequence(needle: &[i64], haystack: &[i64], tolerance: i64) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|candidate| {
        candidate
            .iter()
            .zip(needle)
            .all(|(&h, &n)| (h - n).abs() < tolerance)
    })
}
