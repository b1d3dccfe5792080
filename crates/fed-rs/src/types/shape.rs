//! Tensor shapes with static or unknown extents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Represents a single axis extent in a tensor shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic,
}

/// Logical tensor shape as an ordered list of dimensions. Rank 0 is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    /// Builds a fully static shape from explicit extents.
    pub fn from_static(dims: &[usize]) -> Self {
        Self::new(dims.iter().copied().map(Dimension::Static).collect::<Vec<_>>())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    /// Returns static dimensions when all dims are static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims
            .iter()
            .map(|dim| match dim {
                Dimension::Static(value) => Some(*value),
                Dimension::Dynamic => None,
            })
            .collect()
    }

    /// Returns `true` when the concrete extents in `dims` fit this shape.
    pub fn admits(&self, dims: &[usize]) -> bool {
        self.dims.len() == dims.len()
            && self.dims.iter().zip(dims).all(|(dim, actual)| match dim {
                Dimension::Static(expected) => expected == actual,
                Dimension::Dynamic => true,
            })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            match dim {
                Dimension::Static(value) => write!(f, "{value}")?,
                Dimension::Dynamic => f.write_str("?")?,
            }
        }
        f.write_str("]")
    }
}
