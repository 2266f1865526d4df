/// Median of the samples, reordering the slice in place.
///
/// Even-sized inputs yield the mean of the two middle samples. Returns `None` for an
/// empty slice.
pub(crate) fn median(samples: &mut [f32]) -> Option<f32> {
    let len = samples.len();
    if len == 0 {
        return None;
    }

    let mid = len / 2;
    let (lower, upper, _) = samples.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if len % 2 == 1 {
        return Some(upper);
    }

    // the largest value of the lower partition is the other middle sample
    let lower = lower.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    Some(0.5 * (lower + upper))
}
