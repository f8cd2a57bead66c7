//! Device-resident vectors
//!
//! A [`Vector`] is a fixed-length `f64` buffer owned by one backend. Its
//! length never changes after allocation; assignment copies element-wise
//! from an equal-length vector or broadcasts a scalar. The buffer is freed
//! when the vector drops.

use crate::error::{Error, Result};
use crate::executor::Executor;
use femop_backends::BufferHandle;
use std::fmt;

/// Length-tagged device buffer with value-assignment semantics
pub struct Vector {
    exec: Executor,
    handle: BufferHandle,
    len: usize,
}

impl Vector {
    pub(crate) fn from_parts(exec: Executor, handle: BufferHandle, len: usize) -> Self {
        Self { exec, handle, len }
    }

    /// Get number of elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if vector is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backend buffer identity
    ///
    /// Stable for the lifetime of the vector.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Executor owning the buffer
    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    /// Handles are only meaningful on the backend that issued them.
    pub(crate) fn ensure_same_device(&self, other: &Executor) -> Result<()> {
        if self.exec.same_device(other) {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "vector {} belongs to a different executor",
                self.handle
            )))
        }
    }

    /// `self := other`
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if the lengths differ.
    pub fn assign(&mut self, other: &Vector) -> Result<()> {
        if other.len != self.len {
            return Err(Error::length(self.len, other.len));
        }
        other.ensure_same_device(&self.exec)?;
        let (src, dst) = (other.handle, self.handle);
        self.exec.with_backend(|backend| backend.copy_buffer(src, dst))
    }

    /// Set every element to `value`
    pub fn fill(&mut self, value: f64) -> Result<()> {
        let dst = self.handle;
        self.exec.with_backend(|backend| backend.fill_buffer(dst, value))
    }

    /// Copy data from host slice to vector (H2D transfer)
    pub fn copy_from_slice(&mut self, src: &[f64]) -> Result<()> {
        if src.len() != self.len {
            return Err(Error::length(self.len, src.len()));
        }
        let dst = self.handle;
        self.exec.with_backend(|backend| backend.copy_to_buffer(dst, src))
    }

    /// Copy vector contents to a new host `Vec` (D2H transfer)
    pub fn to_vec(&self) -> Result<Vec<f64>> {
        let mut out = vec![0.0; self.len];
        let src = self.handle;
        self.exec.with_backend(|backend| backend.copy_from_buffer(src, &mut out))?;
        Ok(out)
    }

    /// Allocate a new vector on the same backend holding a copy of `self`
    pub fn try_clone(&self) -> Result<Vector> {
        let mut copy = self.exec.allocate(self.len)?;
        copy.assign(self)?;
        Ok(copy)
    }
}

impl Drop for Vector {
    fn drop(&mut self) {
        if let Err(err) = self.exec.free_buffer(self.handle) {
            tracing::warn!(handle = %self.handle, error = %err, "failed to free vector buffer");
        }
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vector")
            .field("handle", &self.handle)
            .field("len", &self.len)
            .finish()
    }
}
