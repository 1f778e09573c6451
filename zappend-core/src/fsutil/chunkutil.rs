//! Chunk-range math: deciding which existing tail chunk along the
//! append axis must be read-modify-written versus which chunks are freshly
//! created, and enumerating chunk indices for a write.

/// Returns `(first_is_update, [start, end))` for appending `append_size`
/// elements to an axis currently of length `size`, chunked at `chunk_size`.
///
/// `first_is_update` is true when the chunk at index `start` is only
/// partially full (i.e. `size` is not a multiple of `chunk_size`) and must be
/// read-modify-written rather than created fresh.
pub fn get_chunk_update_range(size: u64, chunk_size: u64, append_size: u64) -> (bool, (u64, u64)) {
    assert!(chunk_size > 0, "chunk_size must be positive");
    let start = size / chunk_size;
    let pixel = start * chunk_size;
    let first_is_update = pixel < size && size <= pixel + chunk_size;
    let end = (size + append_size).div_ceil(chunk_size);
    (first_is_update, (start, end))
}

/// Cartesian product of per-dimension chunk indices, with the append axis's
/// range replaced by `[start, end)`.
///
/// `shape` and `chunks` must have the same length; `append_axis` indexes into
/// both.
pub fn get_chunk_indices(
    shape: &[u64],
    chunks: &[u64],
    append_axis: usize,
    append_range: (u64, u64),
) -> Vec<Vec<u64>> {
    assert_eq!(shape.len(), chunks.len());
    assert!(append_axis < shape.len());
    let (start, end) = append_range;
    if end <= start {
        return Vec::new();
    }

    let ranges: Vec<Vec<u64>> = shape
        .iter()
        .zip(chunks.iter())
        .enumerate()
        .map(|(axis, (&s, &c))| {
            if axis == append_axis {
                (start..end).collect()
            } else {
                let n = s.div_ceil(c);
                (0..n).collect()
            }
        })
        .collect();

    cartesian_product(&ranges)
}

fn cartesian_product(ranges: &[Vec<u64>]) -> Vec<Vec<u64>> {
    let mut out: Vec<Vec<u64>> = vec![Vec::new()];
    for r in ranges {
        let mut next = Vec::with_capacity(out.len() * r.len());
        for prefix in &out {
            for &v in r {
                let mut p = prefix.clone();
                p.push(v);
                next.push(p);
            }
        }
        out = next;
    }
    out
}
