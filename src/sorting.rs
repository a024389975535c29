//! Sorting a key array while carrying a companion array through the same
//! permutation.
//!
//! [`merge_sort`] is stable and is the default: equal keys keep their input
//! order, which keeps the two samples of a shock (before, after) in place
//! when waveform samples share a time. [`quick_sort`] is unstable and is
//! used where keys are unique.

/// Stable merge sort of `keys`, applying the same permutation to `carried`.
/// If the lengths differ only the common prefix is sorted.
pub fn merge_sort<K, V>(keys: &mut [K], carried: &mut [V])
where
    K: PartialOrd + Copy,
    V: Copy,
{
    let n = keys.len().min(carried.len());
    if n < 2 {
        return;
    }
    let (keys, carried) = (&mut keys[..n], &mut carried[..n]);
    let mut key_buf = keys.to_vec();
    let mut val_buf = carried.to_vec();
    merge_sort_range(keys, carried, &mut key_buf, &mut val_buf, 0, n);
}

fn merge_sort_range<K, V>(keys: &mut [K], vals: &mut [V], key_buf: &mut [K], val_buf: &mut [V], lo: usize, hi: usize)
where
    K: PartialOrd + Copy,
    V: Copy,
{
    if hi - lo < 2 {
        return;
    }
    let mid = lo + (hi - lo) / 2;
    merge_sort_range(keys, vals, key_buf, val_buf, lo, mid);
    merge_sort_range(keys, vals, key_buf, val_buf, mid, hi);
    merge(keys, vals, key_buf, val_buf, lo, mid, hi);
}

fn merge<K, V>(keys: &mut [K], vals: &mut [V], key_buf: &mut [K], val_buf: &mut [V], lo: usize, mid: usize, hi: usize)
where
    K: PartialOrd + Copy,
    V: Copy,
{
    key_buf[lo..hi].copy_from_slice(&keys[lo..hi]);
    val_buf[lo..hi].copy_from_slice(&vals[lo..hi]);

    let (mut i, mut j, mut k) = (lo, mid, lo);
    while i < mid && j < hi {
        // Take from the left run unless the right key is strictly smaller
        if key_buf[j] < key_buf[i] {
            keys[k] = key_buf[j];
            vals[k] = val_buf[j];
            j += 1;
        } else {
            keys[k] = key_buf[i];
            vals[k] = val_buf[i];
            i += 1;
        }
        k += 1;
    }
    while i < mid {
        keys[k] = key_buf[i];
        vals[k] = val_buf[i];
        i += 1;
        k += 1;
    }
    while j < hi {
        keys[k] = key_buf[j];
        vals[k] = val_buf[j];
        j += 1;
        k += 1;
    }
}

/// In-place quicksort of `keys`, applying the same permutation to `carried`.
/// Not stable. If the lengths differ only the common prefix is sorted.
pub fn quick_sort<K, V>(keys: &mut [K], carried: &mut [V])
where
    K: PartialOrd + Copy,
    V: Copy,
{
    let n = keys.len().min(carried.len());
    if n < 2 {
        return;
    }
    quick_sort_range(&mut keys[..n], &mut carried[..n], 0, n - 1);
}

fn quick_sort_range<K, V>(keys: &mut [K], vals: &mut [V], mut lo: usize, mut hi: usize)
where
    K: PartialOrd + Copy,
    V: Copy,
{
    while lo < hi {
        // Median of three as the pivot, moved to `hi`
        let mid = lo + (hi - lo) / 2;
        if keys[mid] < keys[lo] {
            swap_pair(keys, vals, mid, lo);
        }
        if keys[hi] < keys[lo] {
            swap_pair(keys, vals, hi, lo);
        }
        if keys[mid] < keys[hi] {
            swap_pair(keys, vals, mid, hi);
        }
        let pivot = keys[hi];

        let mut store = lo;
        for i in lo..hi {
            if keys[i] < pivot {
                swap_pair(keys, vals, i, store);
                store += 1;
            }
        }
        swap_pair(keys, vals, store, hi);

        // Recurse into the smaller side to bound stack depth
        if store - lo < hi - store {
            if store > lo {
                quick_sort_range(keys, vals, lo, store - 1);
            }
            lo = store + 1;
        } else {
            if store < hi {
                quick_sort_range(keys, vals, store + 1, hi);
            }
            if store == 0 {
                break;
            }
            hi = store - 1;
        }
    }
}

#[inline]
fn swap_pair<K, V>(keys: &mut [K], vals: &mut [V], a: usize, b: usize) {
    keys.swap(a, b);
    vals.swap(a, b);
}
