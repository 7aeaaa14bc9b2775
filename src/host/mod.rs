//! Host-side buffers and the transfers that stream them through FIFOs.
//!
//! In hardware, the shim DMA reads the host buffer row by row into the
//! input FIFO and writes output rows back into another host buffer:
//!
//! ```text
//!   HostBuffer "input" ──fill (MM2S)──► ObjectFifo ──► worker
//!   HostBuffer "output" ◄─drain (S2MM)── ObjectFifo ◄── worker
//! ```
//!
//! Buffers are linear and row-major. A row of a `width`-wide image is the
//! slice `[row * width, (row + 1) * width)`.
//!
//! # Usage
//!
//! ```
//! use xdna_upscale::host::HostBuffer;
//!
//! let input = HostBuffer::input("input", (0u8..8).collect());
//! assert_eq!(input.rows(4), 2);
//! assert_eq!(input.read_row(1, 4).unwrap(), &[4, 5, 6, 7]);
//!
//! let mut output: HostBuffer<u8> = HostBuffer::output("output", 8);
//! output.write_row(0, &[9, 9, 9, 9]).unwrap();
//! assert_eq!(&output.as_slice()[..4], &[9, 9, 9, 9]);
//! ```

pub mod transfer;

pub use transfer::{Transfer, TransferDirection, TransferError, TransferState, TransferStep};

/// Error type for host buffer access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostBufferError {
    /// Row lies (partly) outside the buffer
    OutOfBounds {
        name: String,
        offset: usize,
        len: usize,
        size: usize,
    },
}

impl std::fmt::Display for HostBufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfBounds { name, offset, len, size } => write!(
                f,
                "'{}': access at {}..{} outside {} elements",
                name,
                offset,
                offset + len,
                size
            ),
        }
    }
}

impl std::error::Error for HostBufferError {}

/// A named linear buffer owned by the host.
#[derive(Debug, Clone)]
pub struct HostBuffer<T> {
    name: String,
    data: Vec<T>,
}

impl<T: Copy + Default> HostBuffer<T> {
    /// Wrap host data that will be streamed to the device.
    pub fn input(name: impl Into<String>, data: Vec<T>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Allocate a zeroed buffer of `len` elements to receive results.
    pub fn output(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            data: vec![T::default(); len],
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Whole rows of `row_len` elements contained in the buffer.
    pub fn rows(&self, row_len: usize) -> usize {
        if row_len == 0 {
            0
        } else {
            self.data.len() / row_len
        }
    }

    fn out_of_bounds(&self, offset: usize, len: usize) -> HostBufferError {
        HostBufferError::OutOfBounds {
            name: self.name.clone(),
            offset,
            len,
            size: self.data.len(),
        }
    }

    /// Row `index` of a `row_len`-wide image.
    pub fn read_row(&self, index: usize, row_len: usize) -> Result<&[T], HostBufferError> {
        let offset = index * row_len;
        if offset + row_len > self.data.len() {
            return Err(self.out_of_bounds(offset, row_len));
        }
        Ok(&self.data[offset..offset + row_len])
    }

    /// Store `row` as row `index`.
    pub fn write_row(&mut self, index: usize, row: &[T]) -> Result<(), HostBufferError> {
        let offset = index * row.len();
        if offset + row.len() > self.data.len() {
            return Err(self.out_of_bounds(offset, row.len()));
        }
        self.data[offset..offset + row.len()].copy_from_slice(row);
        Ok(())
    }
}
