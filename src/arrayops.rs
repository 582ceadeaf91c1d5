//! Array helpers shared by the signal processing stages: paired m/z and intensity
//! arrays, uniform m/z grids and a dense row-major matrix.
use std::borrow::Cow;
use std::iter::Sum;
use std::ops::{Index, IndexMut};

use num_traits::{AsPrimitive, Float};

use crate::search;

/// Trapezoidal integration of `y` over `x`
pub fn trapz<
    A: Float + Clone + AsPrimitive<B> + 'static,
    B: Float + Clone + AsPrimitive<A> + 'static + Sum,
>(
    x: &[A],
    y: &[B],
) -> B {
    let n = x.len().min(y.len());
    if n < 2 {
        return B::zero();
    }
    (0..n - 1)
        .map(|i| {
            let delta = x[i + 1] - x[i];
            delta.as_() * B::from(0.5).unwrap() * (y[i + 1] + y[i])
        })
        .sum()
}

/// The median of `values`, reordering the buffer in the process. An empty buffer has
/// a median of zero.
pub fn median_inplace<T: Float>(values: &mut [T]) -> T {
    let n = values.len();
    if n == 0 {
        return T::zero();
    }
    let mid = n / 2;
    let cmp = |a: &T, b: &T| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal);
    let (lower, upper_mid, _) = values.select_nth_unstable_by(mid, cmp);
    let upper_mid = *upper_mid;
    if n % 2 == 1 {
        upper_mid
    } else {
        let lower_mid = lower.iter().copied().fold(T::neg_infinity(), T::max);
        (lower_mid + upper_mid) / T::from(2.0).unwrap()
    }
}

pub fn median<T: Float>(values: &[T]) -> T {
    let mut buffer = values.to_vec();
    median_inplace(&mut buffer)
}

/// Check if the values in `it` are monotonically ascending or flat
pub fn is_increasing<F: Float>(it: &[F]) -> bool {
    it.windows(2).all(|w| w[0] <= w[1])
}

/// A pair of parallel m/z and intensity arrays which may either be borrowed or owned.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArrayPair<'lifespan> {
    pub mz_array: Cow<'lifespan, [f64]>,
    pub intensity_array: Cow<'lifespan, [f32]>,
    pub min_mz: f64,
    pub max_mz: f64,
}

impl<'lifespan> ArrayPair<'lifespan> {
    pub fn new(mz_array: Cow<'lifespan, [f64]>, intensity_array: Cow<'lifespan, [f32]>) -> Self {
        let min_mz = mz_array.first().copied().unwrap_or(0.0);
        let max_mz = mz_array.last().copied().unwrap_or(0.0);
        Self {
            mz_array,
            intensity_array,
            min_mz,
            max_mz,
        }
    }

    /// Borrow the two slices without copying them
    pub fn wrap(mz_array: &'lifespan [f64], intensity_array: &'lifespan [f32]) -> Self {
        Self::new(Cow::Borrowed(mz_array), Cow::Borrowed(intensity_array))
    }

    pub fn borrow(&self) -> ArrayPair<'_> {
        ArrayPair::new(
            Cow::Borrowed(self.mz_array.as_ref()),
            Cow::Borrowed(self.intensity_array.as_ref()),
        )
    }

    /// The index of the point nearest to `mz`
    pub fn find(&self, mz: f64) -> usize {
        let mz_array: &[f64] = &self.mz_array;
        search::nearest(mz_array, mz)
    }

    pub fn len(&self) -> usize {
        self.mz_array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz_array.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<(f64, f32)> {
        match (self.mz_array.get(index), self.intensity_array.get(index)) {
            (Some(mz), Some(inten)) => Some((*mz, *inten)),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.mz_array
            .iter()
            .copied()
            .zip(self.intensity_array.iter().copied())
    }

    /// The indices of the points between `lo` and `hi` inclusive, as a half-open range.
    pub fn indices_between(&self, lo: f64, hi: f64) -> std::ops::Range<usize> {
        let mz_array: &[f64] = &self.mz_array;
        match search::find_between(mz_array, lo, hi) {
            Some((start, end)) => start..end + 1,
            None => 0..0,
        }
    }

    pub fn is_sorted(&self) -> bool {
        let mz_array: &[f64] = &self.mz_array;
        is_increasing(mz_array)
    }
}

impl<'lifespan> From<(&'lifespan [f64], &'lifespan [f32])> for ArrayPair<'lifespan> {
    fn from(pair: (&'lifespan [f64], &'lifespan [f32])) -> Self {
        Self::wrap(pair.0, pair.1)
    }
}

impl From<(Vec<f64>, Vec<f32>)> for ArrayPair<'static> {
    fn from(pair: (Vec<f64>, Vec<f32>)) -> Self {
        Self::new(Cow::Owned(pair.0), Cow::Owned(pair.1))
    }
}

/// A type that owns a uniformly spaced m/z axis
pub trait MZGrid {
    fn mz_grid(&self) -> &[f64];

    fn create_intensity_array(&self) -> Vec<f32> {
        self.create_intensity_array_of_size(self.mz_grid().len())
    }

    fn create_intensity_array_of_size(&self, size: usize) -> Vec<f32> {
        vec![0.0; size]
    }
}

/// A dense, row-major two dimensional array.
///
/// Rows are scans and columns are m/z bins wherever this is used for signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> Matrix<T> {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }

    /// Build a matrix from equally long rows.
    ///
    /// # Panics
    /// If the rows are of unequal length
    pub fn from_rows(rows: Vec<Vec<T>>) -> Self {
        let n_rows = rows.len();
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(n_rows * cols);
        for row in rows {
            assert_eq!(row.len(), cols, "matrix rows must be of equal length");
            data.extend(row);
        }
        Self {
            rows: n_rows,
            cols,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn column(&self, col: usize) -> Vec<T> {
        (0..self.rows).map(|r| self.data[r * self.cols + col]).collect()
    }

    pub fn set_column(&mut self, col: usize, values: &[T]) {
        assert_eq!(values.len(), self.rows);
        for (r, v) in values.iter().enumerate() {
            self.data[r * self.cols + col] = *v;
        }
    }

    pub fn rows_iter(&self) -> impl Iterator<Item = &[T]> {
        self.data.chunks(self.cols.max(1)).take(self.rows)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Apply `f` elementwise to `self` and `other`, producing a new matrix
    ///
    /// # Panics
    /// If the two matrices are not the same shape
    pub fn zip_map<U: Copy + Default, F: Fn(T, T) -> U>(&self, other: &Matrix<T>, f: F) -> Matrix<U> {
        assert_eq!(
            self.shape(),
            other.shape(),
            "matrix shapes must match for elementwise operations"
        );
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        }
    }

    pub fn map<U: Copy + Default, F: Fn(T) -> U>(&self, f: F) -> Matrix<U> {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|a| f(*a)).collect(),
        }
    }
}

impl<T> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        &self.data[index.0 * self.cols + index.1]
    }
}

impl<T> IndexMut<(usize, usize)> for Matrix<T> {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        &mut self.data[index.0 * self.cols + index.1]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_trapz() {
        let x = [0.0f64, 1.0, 2.0, 3.0];
        let y = [0.0f32, 1.0, 1.0, 0.0];
        let area: f32 = trapz(&x, &y);
        assert!((area - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0f32, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0f32, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median::<f32>(&[]), 0.0);
    }

    #[test]
    fn test_matrix_access() {
        let mut m = Matrix::from_rows(vec![vec![1.0f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m[(1, 2)], 6.0);
        assert_eq!(m.column(1), vec![2.0, 5.0]);
        m.set_column(0, &[0.0, 0.0]);
        assert_eq!(m.row(1), &[0.0, 5.0, 6.0]);
        assert_eq!(m.get(2, 0), None);
    }

    #[test]
    fn test_array_pair_between() {
        let mz = [100.0, 100.5, 101.0, 101.5];
        let inten = [1.0f32, 2.0, 3.0, 4.0];
        let pair = ArrayPair::wrap(&mz, &inten);
        assert_eq!(pair.indices_between(100.4, 101.0), 1..3);
        assert_eq!(pair.find(101.4), 3);
        assert!(pair.is_sorted());
    }
}
