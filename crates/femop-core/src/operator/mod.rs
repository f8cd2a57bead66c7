//! Linear operators over device vectors
//!
//! Every operator has a `height` (output length of [`Operator::apply`]) and a
//! `width` (input length). `apply` maps width → height, `apply_transpose`
//! maps height → width. Outputs are passed in and fully overwritten, so a
//! steady-state caller never allocates.
//!
//! Implementations bracket their body in a profiling region, so nested
//! applications form a call tree in an attached profiler.
//!
//! # Operators
//!
//! - [`IdentityOperator`] - `y := x`, for isolating composition overhead
//! - [`DenseOperator`] - row-major matrix leaf
//! - [`ProlongationOperator`] - gather / scatter-add through an index map
//! - [`RapOperator`] - `Rᵀ A P` composite with owned scratch

mod dense;
mod identity;
mod prolongation;
mod rap;

pub use dense::DenseOperator;
pub use identity::IdentityOperator;
pub use prolongation::ProlongationOperator;
pub use rap::RapOperator;

use crate::error::{Error, Result};
use crate::vector::Vector;

/// Linear operator contract
///
/// Neither method may modify `x`. On success `y` holds the full result.
pub trait Operator {
    /// Output dimension of `apply`
    fn height(&self) -> usize;

    /// Input dimension of `apply`
    fn width(&self) -> usize;

    /// `y := A x` with `x.len() == width` and `y.len() == height`
    fn apply(&self, x: &Vector, y: &mut Vector) -> Result<()>;

    /// `y := Aᵀ x` with `x.len() == height` and `y.len() == width`
    fn apply_transpose(&self, x: &Vector, y: &mut Vector) -> Result<()>;
}

/// Check vector lengths for `apply`.
pub(crate) fn check_apply(op: &(impl Operator + ?Sized), x: &Vector, y: &Vector) -> Result<()> {
    check_lengths(op.width(), op.height(), x, y)
}

/// Check vector lengths for `apply_transpose`.
pub(crate) fn check_transpose(op: &(impl Operator + ?Sized), x: &Vector, y: &Vector) -> Result<()> {
    check_lengths(op.height(), op.width(), x, y)
}

fn check_lengths(input: usize, output: usize, x: &Vector, y: &Vector) -> Result<()> {
    if x.len() != input {
        return Err(Error::length(input, x.len()));
    }
    if y.len() != output {
        return Err(Error::length(output, y.len()));
    }
    Ok(())
}
