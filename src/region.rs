use std::ops::Range;

use tracing::warn;

use crate::error::{Error, Result};
use crate::fill::Width;

/// The part of a segment that gets overwritten on every tick.
///
/// Computed once at startup; `elements * width <= size - offset` always holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionLayout {
    offset: usize,
    elements: usize,
    width: Width,
}

impl RegionLayout {
    pub fn new(
        size: usize,
        offset: usize,
        width: Width,
        max_elements: Option<usize>,
    ) -> Result<Self> {
        if offset % width.bytes() != 0 {
            warn!(
                "offset {} is not a multiple of the alignment {}",
                offset, width
            );
        }

        let available = size.saturating_sub(offset) / width.bytes();
        let elements = match max_elements {
            Some(max) => available.min(max),
            None => available,
        };
        if elements == 0 {
            return Err(Error::NoElements {
                size,
                offset,
                width: width.bytes(),
            });
        }

        Ok(RegionLayout {
            offset,
            elements,
            width,
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn byte_len(&self) -> usize {
        self.elements * self.width.bytes()
    }

    pub fn byte_range(&self) -> Range<usize> {
        self.offset..self.offset + self.byte_len()
    }

    /// Panics if `mem` is shorter than the size the layout was built for.
    pub fn slice_mut<'a>(&self, mem: &'a mut [u8]) -> &'a mut [u8] {
        &mut mem[self.byte_range()]
    }
}
