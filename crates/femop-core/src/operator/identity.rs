use super::{check_apply, check_transpose, Operator};
use crate::error::Result;
use crate::vector::Vector;
use femop_tracing::region;

/// Square operator with `y := x` in both directions
///
/// Stands in for a real discretised operation so a benchmark measures only
/// composition and communication cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityOperator {
    size: usize,
}

impl IdentityOperator {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl Operator for IdentityOperator {
    fn height(&self) -> usize {
        self.size
    }

    fn width(&self) -> usize {
        self.size
    }

    fn apply(&self, x: &Vector, y: &mut Vector) -> Result<()> {
        let _region = region!("Id", DarkCyan);
        check_apply(self, x, y)?;
        y.assign(x)
    }

    fn apply_transpose(&self, x: &Vector, y: &mut Vector) -> Result<()> {
        let _region = region!("Id^T", DarkCyan);
        check_transpose(self, x, y)?;
        y.assign(x)
    }
}
