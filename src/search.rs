//! Binary searches over sorted arrays of coordinates.
use num_traits::Float;

/// The insertion point of `q` in the sorted `array`
pub fn binsearch<T: Float>(array: &[T], q: T) -> usize {
    array.partition_point(|x| *x < q)
}

/// The index of the value in the sorted `vec` closest to `target_val`.
///
/// Ties resolve to the lower index. An empty array yields `0`.
pub fn nearest<T: Float>(vec: &[T], target_val: T) -> usize {
    let n = vec.len();
    if n == 0 {
        return 0;
    }
    let i = binsearch(vec, target_val);
    if i == 0 {
        0
    } else if i >= n {
        n - 1
    } else if (vec[i] - target_val).abs() < (target_val - vec[i - 1]).abs() {
        i
    } else {
        i - 1
    }
}

/// Find the inclusive index bounds of the values in the sorted `array` that lie in `[lo, hi]`.
///
/// Returns `None` when no value falls in the interval.
pub fn find_between<T: Float>(array: &[T], lo: T, hi: T) -> Option<(usize, usize)> {
    let lo_i = binsearch(array, lo);
    let hi_i = array.partition_point(|x| *x <= hi);
    if lo_i >= hi_i {
        None
    } else {
        Some((lo_i, hi_i - 1))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_nearest() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(nearest(&xs, 0.2), 0);
        assert_eq!(nearest(&xs, 2.4), 1);
        assert_eq!(nearest(&xs, 2.6), 2);
        assert_eq!(nearest(&xs, 9.0), 3);
        assert_eq!(nearest::<f64>(&[], 9.0), 0);
    }

    #[test]
    fn test_find_between() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(find_between(&xs, 1.5, 3.0), Some((1, 2)));
        assert_eq!(find_between(&xs, 4.5, 5.0), None);
    }
}
