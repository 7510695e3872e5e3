//! Detector frame type.
//!
//! A `Frame` is a single 2-D detector readout. The sample type is generic so
//! a ronchigram camera delivering `u16` and an EELS camera delivering `f32`
//! flow through the same grabber and stack code.

use ndarray::Array2;

/// Numeric sample type a detector can deliver.
///
/// `Default` provides the zero value used to pre-fill stacks.
pub trait Sample: Copy + Default + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Sample for T where T: Copy + Default + Send + Sync + std::fmt::Debug + 'static {}

/// A single 2-D detector readout, indexed `[row, column]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T> {
    data: Array2<T>,
}

impl<T: Sample> Frame<T> {
    /// Wrap an existing 2-D array.
    pub fn new(data: Array2<T>) -> Self {
        Self { data }
    }

    /// Build a frame of `(rows, cols)` by evaluating `f(row, col)`.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        Self {
            data: Array2::from_shape_fn((rows, cols), |(r, c)| f(r, c)),
        }
    }

    /// Frame filled with a single value.
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            data: Array2::from_elem((rows, cols), value),
        }
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Pixel data.
    pub fn data(&self) -> &Array2<T> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shape_is_rows_by_cols() {
        let frame = Frame::from_fn(3, 5, |r, c| (r * 10 + c) as u16);
        assert_eq!(frame.shape(), (3, 5));
        assert_eq!(frame.data()[[2, 4]], 24);
    }

    #[test]
    fn test_filled_frame() {
        let frame = Frame::filled(2, 2, 1.5f32);
        assert!(frame.data().iter().all(|&v| v == 1.5));
    }
}
