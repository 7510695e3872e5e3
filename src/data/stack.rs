//! Pre-allocated frame stacks.
//!
//! A [`Stack`] is a `rows × columns × frame-index` buffer sized once from the
//! first acquired frame and the plan's total frame count. Slots are written in
//! grid-traversal order; slots never reached (early cancellation, fault) keep
//! their zero fill, so a partial sweep yields a partial stack with a
//! zero-padded tail.
//!
//! [`StackAssembler`] owns the running index and defers allocation until the
//! first frame arrives. That first frame is stored at index 0 rather than
//! being discarded after sizing the buffer.

use ndarray::{Array3, ArrayView2, Axis};
use tracing::{debug, info};

use crate::data::frame::{Frame, Sample};
use crate::error::{AppResult, SweepError};

/// 3-D frame stack indexed `[row, column, frame]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack<T> {
    data: Array3<T>,
}

impl<T: Sample> Stack<T> {
    /// Allocate a zero-filled stack shaped after `first_frame` with room for
    /// `total_frames` frames.
    pub fn allocate(first_frame: &Frame<T>, total_frames: usize) -> Self {
        let (rows, cols) = first_frame.shape();
        let data = Array3::from_elem((rows, cols, total_frames), T::default());
        info!(rows, cols, total_frames, "Allocated frame stack");
        Self { data }
    }

    /// Write `frame` into slot `index`.
    ///
    /// # Errors
    /// - `StackIndexOutOfRange` if `index` is past the planned frame count
    /// - `FrameShapeMismatch` if the frame differs in shape from the stack
    pub fn store(&mut self, index: usize, frame: &Frame<T>) -> AppResult<()> {
        let (rows, cols, capacity) = self.data.dim();
        if index >= capacity {
            return Err(SweepError::StackIndexOutOfRange { index, capacity });
        }
        if frame.shape() != (rows, cols) {
            return Err(SweepError::FrameShapeMismatch {
                expected: (rows, cols),
                actual: frame.shape(),
            });
        }
        self.data
            .index_axis_mut(Axis(2), index)
            .assign(frame.data());
        Ok(())
    }

    /// (rows, columns, frames)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Number of frame slots.
    pub fn capacity(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// View of the frame in slot `index`.
    pub fn frame(&self, index: usize) -> Option<ArrayView2<'_, T>> {
        (index < self.capacity()).then(|| self.data.index_axis(Axis(2), index))
    }

    /// Underlying buffer.
    pub fn data(&self) -> &Array3<T> {
        &self.data
    }
}

/// Assembles frames into a [`Stack`] in acquisition order.
#[derive(Debug)]
pub struct StackAssembler<T> {
    planned_frames: usize,
    stack: Option<Stack<T>>,
    next_index: usize,
}

impl<T: Sample> StackAssembler<T> {
    /// Create an assembler for a sweep of `planned_frames` frames.
    pub fn new(planned_frames: usize) -> Self {
        Self {
            planned_frames,
            stack: None,
            next_index: 0,
        }
    }

    /// Store `frame` in the next grid-ordered slot, allocating the stack from
    /// it if this is the first frame. Returns the slot written.
    pub fn push(&mut self, frame: &Frame<T>) -> AppResult<usize> {
        let index = self.next_index;
        let planned = self.planned_frames;
        let stack = self
            .stack
            .get_or_insert_with(|| Stack::allocate(frame, planned));
        stack.store(index, frame)?;
        debug!(index, "Stored frame");
        self.next_index += 1;
        Ok(index)
    }

    /// Frames stored so far.
    pub fn stored(&self) -> usize {
        self.next_index
    }

    /// Planned frame count the stack is sized for.
    pub fn planned_frames(&self) -> usize {
        self.planned_frames
    }

    /// Stack assembled so far, if any frame has been stored.
    pub fn stack(&self) -> Option<&Stack<T>> {
        self.stack.as_ref()
    }

    /// Consume the assembler, yielding the stack.
    pub fn finish(self) -> Option<Stack<T>> {
        self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_uses_first_frame_shape() {
        let first = Frame::filled(4, 6, 7u16);
        let stack = Stack::allocate(&first, 9);
        assert_eq!(stack.shape(), (4, 6, 9));
        assert!(stack.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_store_writes_single_slot() {
        let first = Frame::filled(2, 3, 1u16);
        let mut stack = Stack::allocate(&first, 3);
        stack.store(1, &Frame::filled(2, 3, 5)).unwrap();

        assert!(stack.frame(0).unwrap().iter().all(|&v| v == 0));
        assert!(stack.frame(1).unwrap().iter().all(|&v| v == 5));
        assert!(stack.frame(2).unwrap().iter().all(|&v| v == 0));
        assert!(stack.frame(3).is_none());
    }

    #[test]
    fn test_store_rejects_mismatched_shape() {
        let first = Frame::filled(2, 3, 1.0f32);
        let mut stack = Stack::allocate(&first, 2);
        let err = stack.store(0, &Frame::filled(3, 2, 1.0)).unwrap_err();
        assert!(matches!(err, SweepError::FrameShapeMismatch { .. }));
    }

    #[test]
    fn test_store_rejects_index_past_plan() {
        let first = Frame::filled(1, 1, 0u8);
        let mut stack = Stack::allocate(&first, 1);
        let err = stack.store(1, &first).unwrap_err();
        assert!(matches!(
            err,
            SweepError::StackIndexOutOfRange {
                index: 1,
                capacity: 1
            }
        ));
    }

    #[test]
    fn test_assembler_reuses_first_frame_as_slot_zero() {
        let mut assembler = StackAssembler::new(4);
        assert!(assembler.stack().is_none());

        assert_eq!(assembler.push(&Frame::filled(2, 2, 3u16)).unwrap(), 0);
        assert_eq!(assembler.push(&Frame::filled(2, 2, 4u16)).unwrap(), 1);
        assert_eq!(assembler.stored(), 2);

        let stack = assembler.finish().unwrap();
        assert_eq!(stack.shape(), (2, 2, 4));
        assert!(stack.frame(0).unwrap().iter().all(|&v| v == 3));
        assert!(stack.frame(1).unwrap().iter().all(|&v| v == 4));
        // unwritten tail stays zero
        assert!(stack.frame(2).unwrap().iter().all(|&v| v == 0));
        assert!(stack.frame(3).unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_assembler_mismatch_does_not_advance() {
        let mut assembler = StackAssembler::new(3);
        assembler.push(&Frame::filled(2, 2, 1u16)).unwrap();
        assert!(assembler.push(&Frame::filled(1, 2, 1u16)).is_err());
        assert_eq!(assembler.stored(), 1);
    }
}
