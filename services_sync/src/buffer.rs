//! Bounded buffer
//!
//! Only occupancy is modelled; items carry no payload. Producers block while
//! the buffer is full and consumers block while it is empty, so the count
//! never leaves `[0, capacity]`.

use thiserror::Error;

/// Buffer operation errors
///
/// Reaching one of these means a caller skipped the full/empty predicate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer overflow at capacity {capacity}")]
    Overflow { capacity: usize },

    #[error("buffer underflow")]
    Underflow,
}

/// Occupancy counter with a fixed capacity
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    occupancy: usize,
    capacity: usize,
    trace: Option<Vec<usize>>,
}

impl BoundedBuffer {
    /// Creates an empty buffer
    pub fn new(capacity: usize) -> Self {
        Self {
            occupancy: 0,
            capacity,
            trace: None,
        }
    }

    /// Records occupancy after every change, starting with the initial 0
    pub fn with_trace(mut self) -> Self {
        self.trace = Some(vec![self.occupancy]);
        self
    }

    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.occupancy >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    /// Adds one item, returning the new occupancy
    pub fn put(&mut self) -> Result<usize, BufferError> {
        if self.is_full() {
            return Err(BufferError::Overflow {
                capacity: self.capacity,
            });
        }
        self.occupancy += 1;
        self.note();
        Ok(self.occupancy)
    }

    /// Removes one item, returning the new occupancy
    pub fn take(&mut self) -> Result<usize, BufferError> {
        if self.is_empty() {
            return Err(BufferError::Underflow);
        }
        self.occupancy -= 1;
        self.note();
        Ok(self.occupancy)
    }

    /// Returns the occupancy trace, if tracing is enabled
    pub fn trace(&self) -> Option<&[usize]> {
        self.trace.as_deref()
    }

    fn note(&mut self) {
        if let Some(trace) = self.trace.as_mut() {
            trace.push(self.occupancy);
        }
    }
}
