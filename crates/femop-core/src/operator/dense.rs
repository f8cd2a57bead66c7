use super::{check_apply, check_transpose, Operator};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::vector::Vector;
use femop_tracing::region;

/// Row-major dense matrix stored on the device
///
/// `apply` is a gemv, `apply_transpose` the transposed gemv. Useful as a
/// general linear leaf when composing operators in tests and benches.
#[derive(Debug)]
pub struct DenseOperator {
    rows: usize,
    cols: usize,
    matrix: Vector,
}

impl DenseOperator {
    /// Upload a `rows × cols` row-major matrix
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `data.len() != rows * cols`.
    pub fn new(exec: &Executor, rows: usize, cols: usize, data: &[f64]) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::length(rows * cols, data.len()));
        }
        Ok(Self {
            rows,
            cols,
            matrix: exec.vector_from_slice(data)?,
        })
    }

    fn gemv(&self, x: &Vector, y: &mut Vector, transpose: bool) -> Result<()> {
        let exec = self.matrix.executor();
        x.ensure_same_device(exec)?;
        y.ensure_same_device(exec)?;
        let (a, xh, yh) = (self.matrix.handle(), x.handle(), y.handle());
        let (rows, cols) = (self.rows, self.cols);
        exec.with_backend(|backend| backend.gemv(a, rows, cols, transpose, xh, yh))
    }
}

impl Operator for DenseOperator {
    fn height(&self) -> usize {
        self.rows
    }

    fn width(&self) -> usize {
        self.cols
    }

    fn apply(&self, x: &Vector, y: &mut Vector) -> Result<()> {
        let _region = region!("Dense", Gold);
        check_apply(self, x, y)?;
        self.gemv(x, y, false)
    }

    fn apply_transpose(&self, x: &Vector, y: &mut Vector) -> Result<()> {
        let _region = region!("Dense^T", Gold);
        check_transpose(self, x, y)?;
        self.gemv(x, y, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_apply_and_transpose() -> Result<()> {
        let exec = Executor::new()?;
        // [1 2 3]
        // [4 5 6]
        let a = DenseOperator::new(&exec, 2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
        assert_eq!((a.height(), a.width()), (2, 3));

        let x = exec.vector_from_slice(&[1.0, 1.0, 1.0])?;
        let mut y = exec.allocate(2)?;
        a.apply(&x, &mut y)?;
        assert_eq!(y.to_vec()?, vec![6.0, 15.0]);

        let mut z = exec.allocate(3)?;
        a.apply_transpose(&y, &mut z)?;
        assert_eq!(z.to_vec()?, vec![66.0, 87.0, 108.0]);
        Ok(())
    }

    #[test]
    fn test_dense_shape_validation() {
        let exec = Executor::new().unwrap();
        let err = DenseOperator::new(&exec, 2, 2, &[1.0; 3]).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { expected: 4, actual: 3 }));
    }
}
