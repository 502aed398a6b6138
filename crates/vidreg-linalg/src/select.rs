//! Selection of the k-th smallest element in expected linear time.
//!
//! The routines never sort the input. They are used to pick per-block saturation thresholds in
//! the corner detector and quantiles of residuals in the robust estimator.

/// Return the k-th smallest value (0-based) of `values`.
///
/// The values are copied into `scratch` and partitioned there, `values` is not modified.
///
/// # Arguments
///
/// * `values` - The input values.
/// * `k` - The rank of the requested value, `0 <= k < values.len()`.
/// * `scratch` - A buffer at least as large as `values`.
///
/// # Panics
///
/// Panics if `values` is empty, if `k` is out of range or if `scratch` is too small.
///
/// # Example
///
/// ```
/// use vidreg_linalg::select::select;
///
/// let values = [5.0f32, 1.0, 4.0, 2.0, 3.0];
/// let mut scratch = [0.0f32; 5];
/// assert_eq!(select(&values, 1, &mut scratch), 2.0);
/// ```
pub fn select<T: PartialOrd + Copy>(values: &[T], k: usize, scratch: &mut [T]) -> T {
    assert!(
        scratch.len() >= values.len(),
        "scratch buffer ({}) is smaller than the input ({})",
        scratch.len(),
        values.len()
    );
    let work = &mut scratch[..values.len()];
    work.copy_from_slice(values);
    select_in_place(work, k)
}

/// Return the k-th smallest value (0-based) of `values`, partially reordering it.
///
/// After the call `values[k]` holds the returned value, everything before it compares less
/// or equal and everything after it compares greater or equal.
///
/// # Panics
///
/// Panics if `k >= values.len()`.
pub fn select_in_place<T: PartialOrd + Copy>(values: &mut [T], k: usize) -> T {
    assert!(
        k < values.len(),
        "rank {} out of range for {} values",
        k,
        values.len()
    );

    let mut lo = 0;
    let mut hi = values.len() - 1;
    loop {
        if hi <= lo + 1 {
            if hi == lo + 1 && values[hi] < values[lo] {
                values.swap(lo, hi);
            }
            return values[k];
        }

        // median of three, leaving lo <= lo + 1 <= hi as sentinels for the scans below
        let mid = lo + (hi - lo) / 2;
        values.swap(mid, lo + 1);
        if values[lo] > values[hi] {
            values.swap(lo, hi);
        }
        if values[lo + 1] > values[hi] {
            values.swap(lo + 1, hi);
        }
        if values[lo] > values[lo + 1] {
            values.swap(lo, lo + 1);
        }

        let pivot = values[lo + 1];
        let mut i = lo + 1;
        let mut j = hi;
        loop {
            i += 1;
            while values[i] < pivot {
                i += 1;
            }
            j -= 1;
            while values[j] > pivot {
                j -= 1;
            }
            if j < i {
                break;
            }
            values.swap(i, j);
        }
        values[lo + 1] = values[j];
        values[j] = pivot;

        if j >= k {
            hi = j - 1;
        }
        if j <= k {
            lo = i;
        }
    }
}

/// The upper median of `values`, i.e. the element of rank `n / 2`.
///
/// # Panics
///
/// Panics if `values` is empty or `scratch` is smaller than `values`.
pub fn median<T: PartialOrd + Copy>(values: &[T], scratch: &mut [T]) -> T {
    select(values, values.len() / 2, scratch)
}

/// The median of three values.
pub fn triple_median<T: PartialOrd + Copy>(a: T, b: T, c: T) -> T {
    if a > b {
        if c > a {
            a
        } else if c > b {
            c
        } else {
            b
        }
    } else if c > b {
        b
    } else if c > a {
        c
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_select_small() {
        let values = [3, 1, 2];
        let mut scratch = [0; 3];
        assert_eq!(select(&values, 0, &mut scratch), 1);
        assert_eq!(select(&values, 1, &mut scratch), 2);
        assert_eq!(select(&values, 2, &mut scratch), 3);
        assert_eq!(values, [3, 1, 2]);
    }

    #[test]
    fn test_select_single() {
        let mut scratch = [0.0f32; 4];
        assert_eq!(select(&[7.5f32], 0, &mut scratch), 7.5);
    }

    #[test]
    fn test_select_against_sort() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let n = rng.random_range(1..200);
            // a narrow range forces plenty of duplicates
            let hi = if rng.random_bool(0.5) { 5 } else { 1000 };
            let values: Vec<i32> = (0..n).map(|_| rng.random_range(0..hi)).collect();
            let mut sorted = values.clone();
            sorted.sort();
            let mut scratch = vec![0; n + 3];
            for k in 0..n {
                assert_eq!(select(&values, k, &mut scratch), sorted[k], "n={n} k={k}");
            }
        }
    }

    #[test]
    fn test_select_in_place_partitions() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut values: Vec<f64> = (0..101).map(|_| rng.random::<f64>()).collect();
        let k = 37;
        let kth = select_in_place(&mut values, k);
        assert_eq!(values[k], kth);
        assert!(values[..k].iter().all(|&v| v <= kth));
        assert!(values[k + 1..].iter().all(|&v| v >= kth));
    }

    #[test]
    fn test_median() {
        let mut scratch = [0.0; 4];
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0], &mut scratch), 3.0);
        assert_eq!(median(&[4.0, 1.0, 3.0], &mut scratch), 3.0);
    }

    #[test]
    fn test_triple_median() {
        for (a, b, c) in [(1, 2, 3), (1, 3, 2), (2, 1, 3), (2, 3, 1), (3, 1, 2), (3, 2, 1)] {
            assert_eq!(triple_median(a, b, c), 2);
        }
        assert_eq!(triple_median(2, 2, 1), 2);
    }

    #[test]
    #[should_panic]
    fn test_select_rank_out_of_range() {
        let mut scratch = [0; 2];
        select(&[1, 2], 2, &mut scratch);
    }

    #[test]
    #[should_panic]
    fn test_select_small_scratch() {
        let mut scratch = [0; 1];
        select(&[1, 2], 0, &mut scratch);
    }
}
