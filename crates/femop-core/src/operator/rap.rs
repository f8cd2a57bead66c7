//! Composite restriction-operation-prolongation operator
//!
//! `RapOperator` applies `Rᵀ A P`: prolong the true-dof input, apply the
//! inner operator in the local space, restrict back. The two intermediate
//! vectors are allocated once at construction and serve both the forward
//! and the transpose path:
//!
//! ```text
//! apply:            x ──P──▶ px ──A──▶ apx ──Rᵀ──▶ y
//! apply_transpose:  x ──R──▶ apx ──Aᵀ──▶ px ──Pᵀ──▶ y
//! ```

use super::{check_apply, check_transpose, Operator};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::vector::Vector;
use femop_backends::BufferHandle;
use femop_tracing::region;
use std::cell::RefCell;

struct RapScratch {
    /// Length `prolongation.height()`
    px: Vector,
    /// Length `inner.height()`
    apx: Vector,
}

/// `Rᵀ A P` built from borrowed sub-operators
///
/// Applications take `&self` and mutate the owned scratch through a
/// `RefCell`, which makes the type `!Sync`: one instance serves one caller
/// at a time.
pub struct RapOperator<'a> {
    restriction_transpose: &'a dyn Operator,
    inner: &'a dyn Operator,
    prolongation: &'a dyn Operator,
    scratch: RefCell<RapScratch>,
}

impl<'a> RapOperator<'a> {
    /// Compose `restriction_transpose`, `inner` and `prolongation`
    ///
    /// Requires `restriction_transpose.width() == prolongation.width()` (the
    /// composite's height and width), `inner.width() == prolongation.height()`
    /// and `inner.height() == restriction_transpose.height()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the sub-operators do not
    /// compose, or a backend error if scratch allocation fails.
    pub fn new(
        exec: &Executor,
        restriction_transpose: &'a dyn Operator,
        inner: &'a dyn Operator,
        prolongation: &'a dyn Operator,
    ) -> Result<Self> {
        if restriction_transpose.width() != prolongation.width() {
            return Err(Error::dimension(
                "RAP restriction width",
                prolongation.width(),
                restriction_transpose.width(),
            ));
        }
        if inner.width() != prolongation.height() {
            return Err(Error::dimension("RAP inner width", prolongation.height(), inner.width()));
        }
        if inner.height() != restriction_transpose.height() {
            return Err(Error::dimension(
                "RAP inner height",
                restriction_transpose.height(),
                inner.height(),
            ));
        }

        let scratch = RapScratch {
            px: exec.allocate(prolongation.height())?,
            apx: exec.allocate(inner.height())?,
        };
        tracing::debug!(
            size = prolongation.width(),
            px = scratch.px.len(),
            apx = scratch.apx.len(),
            "rap_operator_created"
        );

        Ok(Self {
            restriction_transpose,
            inner,
            prolongation,
            scratch: RefCell::new(scratch),
        })
    }

    /// Buffer identities of the two scratch vectors
    ///
    /// `None` while an application is in progress.
    pub fn scratch_handles(&self) -> Option<(BufferHandle, BufferHandle)> {
        let scratch = self.scratch.try_borrow().ok()?;
        Some((scratch.px.handle(), scratch.apx.handle()))
    }

    fn scratch_mut(&self) -> Result<std::cell::RefMut<'_, RapScratch>> {
        self.scratch
            .try_borrow_mut()
            .map_err(|_| Error::InvalidOperation("RapOperator applied re-entrantly".into()))
    }
}

impl Operator for RapOperator<'_> {
    fn height(&self) -> usize {
        self.restriction_transpose.width()
    }

    fn width(&self) -> usize {
        self.prolongation.width()
    }

    fn apply(&self, x: &Vector, y: &mut Vector) -> Result<()> {
        let _region = region!("RAP", SkyBlue);
        check_apply(self, x, y)?;
        let mut scratch = self.scratch_mut()?;
        let RapScratch { px, apx } = &mut *scratch;
        self.prolongation.apply(x, px)?;
        self.inner.apply(px, apx)?;
        self.restriction_transpose.apply_transpose(apx, y)
    }

    fn apply_transpose(&self, x: &Vector, y: &mut Vector) -> Result<()> {
        let _region = region!("RAP^T", SkyBlue);
        check_transpose(self, x, y)?;
        let mut scratch = self.scratch_mut()?;
        let RapScratch { px, apx } = &mut *scratch;
        self.restriction_transpose.apply(x, apx)?;
        self.inner.apply_transpose(apx, px)?;
        self.prolongation.apply_transpose(px, y)
    }
}

impl std::fmt::Debug for RapOperator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RapOperator")
            .field("height", &self.height())
            .field("width", &self.width())
            .field("inner", &(self.inner.height(), self.inner.width()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{DenseOperator, IdentityOperator};

    #[test]
    fn test_rejects_mismatched_inner() -> Result<()> {
        let exec = Executor::new()?;
        let p = DenseOperator::new(&exec, 3, 2, &[1.0; 6])?;
        let inner = IdentityOperator::new(4);

        let err = RapOperator::new(&exec, &p, &inner, &p).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                context: "RAP inner width",
                expected: 3,
                actual: 4
            }
        ));
        Ok(())
    }

    #[test]
    fn test_rejects_mismatched_restriction() -> Result<()> {
        let exec = Executor::new()?;
        let p = DenseOperator::new(&exec, 3, 2, &[1.0; 6])?;
        let rt = DenseOperator::new(&exec, 3, 5, &[1.0; 15])?;
        let inner = IdentityOperator::new(3);

        let err = RapOperator::new(&exec, &rt, &inner, &p).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { context: "RAP restriction width", .. }));
        Ok(())
    }

    #[test]
    fn test_rectangular_composite() -> Result<()> {
        let exec = Executor::new()?;
        // P: 2 -> 3, A: 3 -> 3, R^T: 3 -> 2, so RAP is 2x2 = Pᵀ P for R = P
        let p = DenseOperator::new(&exec, 3, 2, &[1.0, 0.0, 1.0, 1.0, 0.0, 1.0])?;
        let inner = IdentityOperator::new(3);
        let rap = RapOperator::new(&exec, &p, &inner, &p)?;
        assert_eq!((rap.height(), rap.width()), (2, 2));

        let x = exec.vector_from_slice(&[1.0, 2.0])?;
        let mut y = exec.allocate(2)?;
        rap.apply(&x, &mut y)?;
        // PᵀP = [[2, 1], [1, 2]]
        assert_eq!(y.to_vec()?, vec![4.0, 5.0]);
        Ok(())
    }

    #[test]
    fn test_scratch_reused_without_allocation() -> Result<()> {
        let exec = Executor::new()?;
        let id = IdentityOperator::new(8);
        let rap = RapOperator::new(&exec, &id, &id, &id)?;
        let x = exec.constant(8, 1.0)?;
        let mut y = exec.allocate(8)?;

        let handles = rap.scratch_handles();
        let allocations = exec.stats().allocations;
        for _ in 0..5 {
            rap.apply(&x, &mut y)?;
            rap.apply_transpose(&x, &mut y)?;
        }
        assert_eq!(rap.scratch_handles(), handles);
        assert_eq!(exec.stats().allocations, allocations);
        assert_eq!((rap.height(), rap.width()), (8, 8));
        Ok(())
    }
}
