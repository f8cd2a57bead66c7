//! Host kernels for the CPU backend
//!
//! Element-wise kernels switch to rayon above [`PARALLEL_THRESHOLD`]
//! elements; below that the fork/join overhead dominates.

use rayon::prelude::*;

/// Element count above which kernels run in parallel
pub(crate) const PARALLEL_THRESHOLD: usize = 1 << 14;

pub(crate) fn copy(src: &[f64], dst: &mut [f64]) {
    if dst.len() >= PARALLEL_THRESHOLD {
        dst.par_iter_mut().zip(src.par_iter()).for_each(|(d, s)| *d = *s);
    } else {
        dst.copy_from_slice(src);
    }
}

pub(crate) fn fill(dst: &mut [f64], value: f64) {
    if dst.len() >= PARALLEL_THRESHOLD {
        dst.par_iter_mut().for_each(|d| *d = value);
    } else {
        dst.fill(value);
    }
}

/// `dst[i] = src[map[i]]`; callers have bounds-checked `map` against `src`.
pub(crate) fn gather(src: &[f64], map: &[u32], dst: &mut [f64]) {
    if dst.len() >= PARALLEL_THRESHOLD {
        dst.par_iter_mut()
            .zip(map.par_iter())
            .for_each(|(d, &m)| *d = src[m as usize]);
    } else {
        for (d, &m) in dst.iter_mut().zip(map) {
            *d = src[m as usize];
        }
    }
}

/// `dst = 0; dst[map[i]] += src[i]`. Sequential: targets collide.
pub(crate) fn scatter_add(src: &[f64], map: &[u32], dst: &mut [f64]) {
    dst.fill(0.0);
    for (&s, &m) in src.iter().zip(map) {
        dst[m as usize] += s;
    }
}

/// `y = A x` for row-major `A` (`rows × cols`).
pub(crate) fn gemv(a: &[f64], rows: usize, cols: usize, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(a.len(), rows * cols);
    let row_dot = |r: usize| -> f64 {
        let row = &a[r * cols..(r + 1) * cols];
        row.iter().zip(x).map(|(aij, xj)| aij * xj).sum()
    };
    if rows * cols >= PARALLEL_THRESHOLD {
        y.par_iter_mut().enumerate().for_each(|(r, yr)| *yr = row_dot(r));
    } else {
        for (r, yr) in y.iter_mut().enumerate() {
            *yr = row_dot(r);
        }
    }
}

/// `y = Aᵀ x` for row-major `A` (`rows × cols`).
pub(crate) fn gemv_transpose(a: &[f64], rows: usize, cols: usize, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(a.len(), rows * cols);
    let col_dot = |c: usize| -> f64 { (0..rows).map(|r| a[r * cols + c] * x[r]).sum() };
    if rows * cols >= PARALLEL_THRESHOLD {
        y.par_iter_mut().enumerate().for_each(|(c, yc)| *yc = col_dot(c));
    } else {
        for (c, yc) in y.iter_mut().enumerate() {
            *yc = col_dot(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_and_scatter_are_adjoint_on_small_maps() {
        let map = [0u32, 1, 1, 2];
        let src = [1.0, 2.0, 3.0];
        let mut local = [0.0; 4];
        gather(&src, &map, &mut local);
        assert_eq!(local, [1.0, 2.0, 2.0, 3.0]);

        let mut back = [9.0; 3];
        scatter_add(&local, &map, &mut back);
        assert_eq!(back, [1.0, 4.0, 3.0]);
    }

    #[test]
    fn gemv_matches_hand_computation() {
        // [1 2 3]
        // [4 5 6]
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut y = [0.0; 2];
        gemv(&a, 2, 3, &[1.0, 0.0, -1.0], &mut y);
        assert_eq!(y, [-2.0, -2.0]);

        let mut z = [0.0; 3];
        gemv_transpose(&a, 2, 3, &[1.0, 1.0], &mut z);
        assert_eq!(z, [5.0, 7.0, 9.0]);
    }

    #[test]
    fn large_kernels_take_parallel_path() {
        let n = PARALLEL_THRESHOLD * 2;
        let src: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut dst = vec![0.0; n];
        copy(&src, &mut dst);
        assert_eq!(dst, src);

        fill(&mut dst, 2.5);
        assert!(dst.iter().all(|&v| v == 2.5));

        let map: Vec<u32> = (0..n as u32).rev().collect();
        gather(&src, &map, &mut dst);
        assert_eq!(dst[0], (n - 1) as f64);
        assert_eq!(dst[n - 1], 0.0);
    }
}
