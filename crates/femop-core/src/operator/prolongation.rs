use super::{check_apply, check_transpose, Operator};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::vector::Vector;
use femop_backends::IndexHandle;
use femop_tracing::region;

/// Prolongation from true dofs to local dofs through an index map
///
/// `apply` gathers (`y[i] = x[map[i]]`), duplicating shared true dofs into
/// every local dof that references them. `apply_transpose` is the matching
/// restriction: a scatter-add that sums local contributions back onto their
/// true dof. Width is the true size, height the map length.
pub struct ProlongationOperator {
    exec: Executor,
    map: IndexHandle,
    true_size: usize,
    local_size: usize,
}

impl ProlongationOperator {
    /// Upload `map` (one true-dof index per local dof)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if an entry is `>= true_size`.
    pub fn new(exec: &Executor, true_size: usize, map: &[u32]) -> Result<Self> {
        if let Some((local, &target)) = map.iter().enumerate().find(|&(_, &t)| t as usize >= true_size) {
            return Err(Error::InvalidOperation(format!(
                "prolongation map entry {local} points at true dof {target}, but only {true_size} exist"
            )));
        }
        Ok(Self {
            exec: exec.clone(),
            map: exec.upload_indices(map)?,
            true_size,
            local_size: map.len(),
        })
    }
}

impl Operator for ProlongationOperator {
    fn height(&self) -> usize {
        self.local_size
    }

    fn width(&self) -> usize {
        self.true_size
    }

    fn apply(&self, x: &Vector, y: &mut Vector) -> Result<()> {
        let _region = region!("P", Orange);
        check_apply(self, x, y)?;
        x.ensure_same_device(&self.exec)?;
        y.ensure_same_device(&self.exec)?;
        let (src, map, dst) = (x.handle(), self.map, y.handle());
        self.exec.with_backend(|backend| backend.gather(src, map, dst))
    }

    fn apply_transpose(&self, x: &Vector, y: &mut Vector) -> Result<()> {
        let _region = region!("P^T", Orange);
        check_transpose(self, x, y)?;
        x.ensure_same_device(&self.exec)?;
        y.ensure_same_device(&self.exec)?;
        let (src, map, dst) = (x.handle(), self.map, y.handle());
        self.exec.with_backend(|backend| backend.scatter_add(src, map, dst))
    }
}

impl Drop for ProlongationOperator {
    fn drop(&mut self) {
        if let Err(err) = self.exec.free_indices(self.map) {
            tracing::warn!(map = %self.map, error = %err, "failed to free prolongation map");
        }
    }
}

impl std::fmt::Debug for ProlongationOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProlongationOperator")
            .field("true_size", &self.true_size)
            .field("local_size", &self.local_size)
            .finish()
    }
}
