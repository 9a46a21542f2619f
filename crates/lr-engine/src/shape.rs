use crate::error::{EngineError, Result};
use std::fmt;

/// A tensor shape, wrapping a vector of dimension sizes.
///
/// A shape with no dimensions describes a scalar (one element).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape from a vector of dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    /// Create a shape from signed sizes as supplied by callers.
    ///
    /// # Errors
    /// Returns an error if any size is negative.
    pub fn from_sizes(sizes: &[i64]) -> Result<Self> {
        let dims = sizes
            .iter()
            .map(|&s| usize::try_from(s).map_err(|_| EngineError::NegativeDimension(s)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Shape { dims })
    }

    /// Signed view of the dimensions.
    pub fn sizes(&self) -> Vec<i64> {
        self.dims.iter().map(|&d| d as i64).collect()
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the size of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Returns a reference to the underlying dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Computes row-major contiguous strides for this shape.
    ///
    /// For a shape [d0, d1, d2], the strides are [d1*d2, d2, 1].
    pub fn strides(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            return vec![];
        }
        let mut strides = vec![0usize; self.dims.len()];
        strides[self.dims.len() - 1] = 1;
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Compute the broadcast shape of `a` and `b` using numpy-style broadcasting rules.
    ///
    /// Rules:
    /// 1. If the shapes have different numbers of dimensions, the shorter shape is
    ///    padded with ones on the left.
    /// 2. For each dimension, sizes must either be equal, or one of them must be 1.
    ///    The output dimension is the maximum of the two.
    pub fn broadcast_shape(a: &Shape, b: &Shape) -> Result<Shape> {
        let max_ndim = a.ndim().max(b.ndim());
        let mut result = Vec::with_capacity(max_ndim);

        for i in 0..max_ndim {
            // Index from the right: dim at position (ndim - 1 - i) from the right
            let da = if i < a.ndim() {
                a.dims[a.ndim() - 1 - i]
            } else {
                1
            };
            let db = if i < b.ndim() {
                b.dims[b.ndim() - 1 - i]
            } else {
                1
            };

            if da == db {
                result.push(da);
            } else if da == 1 {
                result.push(db);
            } else if db == 1 {
                result.push(da);
            } else {
                return Err(broadcast_error(a, b));
            }
        }

        result.reverse();
        Ok(Shape::new(result))
    }

    /// Returns true if this shape can be expanded to `target` without
    /// changing `target` (one-directional broadcasting).
    pub fn expands_to(&self, target: &Shape) -> bool {
        if self.ndim() > target.ndim() {
            return false;
        }
        let offset = target.ndim() - self.ndim();
        self.dims
            .iter()
            .enumerate()
            .all(|(i, &d)| d == 1 || d == target.dims[i + offset])
    }

    /// For every element of `target` (row-major), the linear index of the
    /// element of `self` it reads under broadcasting.
    ///
    /// # Errors
    /// Returns an error if `self` does not expand to `target`.
    pub fn broadcast_index_map(&self, target: &Shape) -> Result<Vec<usize>> {
        if !self.expands_to(target) {
            return Err(broadcast_error(self, target));
        }
        let offset = target.ndim() - self.ndim();
        let src_strides = self.strides();
        // Stride 0 on every dimension that is stretched or missing.
        let strides: Vec<usize> = (0..target.ndim())
            .map(|i| {
                if i < offset || self.dims[i - offset] == 1 {
                    0
                } else {
                    src_strides[i - offset]
                }
            })
            .collect();

        let n = target.numel();
        let mut map = Vec::with_capacity(n);
        let mut index = vec![0usize; target.ndim()];
        for _ in 0..n {
            map.push(index.iter().zip(&strides).map(|(i, s)| i * s).sum());
            for d in (0..target.ndim()).rev() {
                index[d] += 1;
                if index[d] < target.dims[d] {
                    break;
                }
                index[d] = 0;
            }
        }
        Ok(map)
    }
}

fn broadcast_error(a: &Shape, b: &Shape) -> EngineError {
    EngineError::BroadcastError {
        a: a.dims.clone(),
        b: b.dims.clone(),
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_shape() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.dim(0), 2);
        assert_eq!(s.dim(2), 4);
        assert_eq!(s.sizes(), vec![2, 3, 4]);
    }

    #[test]
    fn test_from_sizes_negative() {
        assert!(Shape::from_sizes(&[2, -1]).is_err());
        assert_eq!(Shape::from_sizes(&[2, 0]).unwrap().numel(), 0);
    }

    #[test]
    fn test_strides() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.strides(), vec![12, 4, 1]);
    }

    #[test]
    fn test_scalar_shape() {
        let s = Shape::new(vec![]);
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1); // product of empty = 1
        assert_eq!(s.strides(), vec![]);
    }

    #[test]
    fn test_broadcast_expand() {
        let a = Shape::new(vec![2, 1]);
        let b = Shape::new(vec![1, 3]);
        let c = Shape::broadcast_shape(&a, &b).unwrap();
        assert_eq!(c.dims(), &[2, 3]);
    }

    #[test]
    fn test_broadcast_different_ndim() {
        let a = Shape::new(vec![8, 1, 6, 1]);
        let b = Shape::new(vec![7, 1, 5]);
        let c = Shape::broadcast_shape(&a, &b).unwrap();
        assert_eq!(c.dims(), &[8, 7, 6, 5]);
    }

    #[test]
    fn test_broadcast_error() {
        let a = Shape::new(vec![2, 3]);
        let b = Shape::new(vec![2, 4]);
        assert!(Shape::broadcast_shape(&a, &b).is_err());
    }

    #[test]
    fn test_expands_to() {
        let target = Shape::new(vec![2, 3]);
        assert!(Shape::new(vec![3]).expands_to(&target));
        assert!(Shape::new(vec![2, 1]).expands_to(&target));
        assert!(!Shape::new(vec![3, 1]).expands_to(&target));
        assert!(!Shape::new(vec![1, 2, 3]).expands_to(&Shape::new(vec![3])));
    }

    #[test]
    fn test_broadcast_index_map() {
        let map = Shape::new(vec![2, 1])
            .broadcast_index_map(&Shape::new(vec![2, 3]))
            .unwrap();
        assert_eq!(map, vec![0, 0, 0, 1, 1, 1]);

        let map = Shape::new(vec![3])
            .broadcast_index_map(&Shape::new(vec![2, 3]))
            .unwrap();
        assert_eq!(map, vec![0, 1, 2, 0, 1, 2]);
    }
}
