//! Distributed finite-element space metadata
//!
//! [`DistributedSpace`] is what the benchmark needs from a space: its
//! dimension, the local and true-dof sizes, the global true size and the
//! prolongation from true dofs to local dofs.
//!
//! [`StructuredSpace`] is a small concrete space on a tensor-product grid of
//! `elements_per_axis^dim` elements with Lagrange-like nodes of a given
//! order. True dofs are the `(elements_per_axis * order + 1)^dim` grid nodes;
//! local dofs are the `(order + 1)^dim` nodes of every element, so nodes on
//! element faces appear once per adjacent element. Ranks do not share dofs.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::operator::{Operator, ProlongationOperator};
use femop_tracing::timed_block;

/// Space metadata consumed by the benchmark driver
pub trait DistributedSpace {
    /// Spatial dimension
    fn dimension(&self) -> usize;

    /// Number of local dofs (prolongation height)
    fn local_size(&self) -> usize;

    /// Number of true dofs owned by this rank (prolongation width)
    fn true_local_size(&self) -> usize;

    /// Number of true dofs over all ranks
    fn global_true_size(&self) -> u64;

    /// Map from true dofs to local dofs
    fn prolongation(&self) -> &dyn Operator;
}

/// Tensor-product grid space, one per rank
#[derive(Debug)]
pub struct StructuredSpace {
    dim: usize,
    order: usize,
    elements_per_axis: usize,
    global_true_size: u64,
    prolongation: ProlongationOperator,
}

impl StructuredSpace {
    /// Build the space on `exec` and agree on the global size over `comm`
    ///
    /// Collective: every rank of `comm` must call this.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for `dim` outside `1..=3`, `order == 0`,
    /// `elements_per_axis == 0`, or a grid too large for `u32` indices.
    #[tracing::instrument(skip(exec, comm), fields(rank = comm.rank()))]
    pub fn new(
        exec: &Executor,
        comm: &dyn Communicator,
        dim: usize,
        order: usize,
        elements_per_axis: usize,
    ) -> Result<Self> {
        if !(1..=3).contains(&dim) {
            return Err(Error::InvalidConfig(format!("dimension must be 1, 2 or 3, got {dim}")));
        }
        if order == 0 {
            return Err(Error::InvalidConfig("order must be >= 1".into()));
        }
        if elements_per_axis == 0 {
            return Err(Error::InvalidConfig("elements per axis must be >= 1".into()));
        }

        let (map, _map_us) = timed_block!("element_node_map", { element_node_map(dim, order, elements_per_axis) });
        let map = map?;
        // every grid node belongs to at least one element
        let true_size = map.iter().max().map_or(0, |&max| max as usize + 1);
        let prolongation = ProlongationOperator::new(exec, true_size, &map)?;
        let global_true_size = comm.all_reduce_sum(true_size as u64);

        tracing::debug!(
            true_size,
            local_size = map.len(),
            global_true_size,
            "structured_space_created"
        );

        Ok(Self {
            dim,
            order,
            elements_per_axis,
            global_true_size,
            prolongation,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn elements_per_axis(&self) -> usize {
        self.elements_per_axis
    }
}

impl DistributedSpace for StructuredSpace {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn local_size(&self) -> usize {
        self.prolongation.height()
    }

    fn true_local_size(&self) -> usize {
        self.prolongation.width()
    }

    fn global_true_size(&self) -> u64 {
        self.global_true_size
    }

    fn prolongation(&self) -> &dyn Operator {
        &self.prolongation
    }
}

fn nodes_per_axis(order: usize, elements_per_axis: usize) -> Option<usize> {
    elements_per_axis.checked_mul(order)?.checked_add(1)
}

/// Grid-node index of every element-local node, elements and nodes both in
/// lexicographic order with x fastest.
///
/// Both the grid and the map itself must be addressable with `u32`.
fn element_node_map(dim: usize, order: usize, elements_per_axis: usize) -> Result<Vec<u32>> {
    let fits_u32 = |size: Option<usize>| size.filter(|&size| u32::try_from(size).is_ok());

    let n = nodes_per_axis(order, elements_per_axis);
    let true_size = n.and_then(|n| n.checked_pow(dim as u32));
    let Some(n) = fits_u32(true_size).and(n) else {
        return Err(Error::InvalidConfig(format!(
            "{elements_per_axis} elements of order {order} per axis in {dim}D exceed u32 grid indices"
        )));
    };

    let p1 = order + 1;
    let elements = elements_per_axis.pow(dim as u32);
    let nodes_per_element = p1.pow(dim as u32);
    let Some(local_size) = fits_u32(elements.checked_mul(nodes_per_element)) else {
        return Err(Error::InvalidConfig(format!(
            "{elements} elements of {nodes_per_element} nodes exceed u32 local indices"
        )));
    };
    let mut map = Vec::with_capacity(local_size);

    for element in 0..elements {
        let e = unravel(element, elements_per_axis, dim);
        for node in 0..nodes_per_element {
            let l = unravel(node, p1, dim);
            let mut index = 0;
            let mut stride = 1;
            for axis in 0..dim {
                index += (e[axis] * order + l[axis]) * stride;
                stride *= n;
            }
            map.push(index as u32);
        }
    }
    Ok(map)
}

fn unravel(mut flat: usize, extent: usize, dim: usize) -> [usize; 3] {
    let mut coords = [0; 3];
    for coord in coords.iter_mut().take(dim) {
        *coord = flat % extent;
        flat /= extent;
    }
    coords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialCommunicator;

    #[test]
    fn test_1d_linear_map() {
        let map = element_node_map(1, 1, 3).unwrap();
        assert_eq!(map, vec![0, 1, 1, 2, 2, 3]);
    }

    #[test]
    fn test_2d_quadratic_sizes() -> Result<()> {
        let exec = Executor::new()?;
        let space = StructuredSpace::new(&exec, &SerialCommunicator, 2, 2, 3)?;
        assert_eq!(space.dimension(), 2);
        // 7x7 grid nodes, 9 elements of 3x3 nodes
        assert_eq!(space.true_local_size(), 49);
        assert_eq!(space.local_size(), 81);
        assert_eq!(space.global_true_size(), 49);
        assert_eq!(space.prolongation().height(), 81);
        assert_eq!(space.prolongation().width(), 49);
        Ok(())
    }

    #[test]
    fn test_first_element_of_2d_grid() {
        // order 1, 2x2 elements, 3x3 grid nodes
        let map = element_node_map(2, 1, 2).unwrap();
        assert_eq!(&map[..4], &[0, 1, 3, 4]);
        assert_eq!(&map[4..8], &[1, 2, 4, 5]);
    }

    #[test]
    fn test_oversized_local_map_is_rejected() {
        // (1000 + 1)^3 grid nodes fit u32, 8 * 1000^3 element-local nodes do not
        assert!(matches!(element_node_map(3, 1, 1000), Err(Error::InvalidConfig(_))));
        assert!(matches!(element_node_map(1, 1, 3_000_000_000), Err(Error::InvalidConfig(_))));
        assert!(matches!(element_node_map(3, 2, 2000), Err(Error::InvalidConfig(_))));
        assert!(matches!(element_node_map(1, usize::MAX, 2), Err(Error::InvalidConfig(_))));

        let exec = Executor::new().unwrap();
        let err = StructuredSpace::new(&exec, &SerialCommunicator, 3, 1, 1000).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(exec.stats().allocations, 0);
    }

    #[test]
    fn test_invalid_configuration() {
        let exec = Executor::new().unwrap();
        let comm = SerialCommunicator;
        assert!(matches!(StructuredSpace::new(&exec, &comm, 4, 1, 1), Err(Error::InvalidConfig(_))));
        assert!(matches!(StructuredSpace::new(&exec, &comm, 2, 0, 1), Err(Error::InvalidConfig(_))));
        assert!(matches!(StructuredSpace::new(&exec, &comm, 2, 1, 0), Err(Error::InvalidConfig(_))));
    }
}
