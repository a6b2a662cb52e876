/// Occupancy estimate for a report window.
///
/// Zero counts are treated as missed detections and ignored. The result is the
/// median of the remaining values; for an even number of values it is the floor
/// of the mean of the two middle values. An empty or all-zero window yields 0.
pub fn estimate_occupancy(window: &[u32]) -> u32 {
    let mut counts: Vec<u32> = window.iter().copied().filter(|&c| c != 0).collect();
    if counts.is_empty() {
        return 0;
    }

    counts.sort_unstable();
    let mid = counts.len() / 2;

    if counts.len() % 2 == 1 {
        counts[mid]
    } else {
        ((counts[mid - 1] as u64 + counts[mid] as u64) / 2) as u32
    }
}
