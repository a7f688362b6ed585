//! Composite sample frame.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::consts::{FRAME_BYTES, FRAME_CAPACITY};

const_assert_eq!(FRAME_BYTES, 32);

/// One acquisition's channel values in registry order.
///
/// Slots past [`elements`](Self::elements) are always zero. Pushing into a
/// full frame is refused and reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleFrame {
    values: [i32; FRAME_CAPACITY],
    elements: u8,
}

impl SampleFrame {
    /// Empty frame.
    pub const fn new() -> Self {
        Self {
            values: [0; FRAME_CAPACITY],
            elements: 0,
        }
    }

    /// Append one value. Returns `false` if the frame is full.
    #[inline]
    pub fn push(&mut self, value: i32) -> bool {
        let idx = self.elements as usize;
        if idx >= FRAME_CAPACITY {
            return false;
        }
        self.values[idx] = value;
        self.elements += 1;
        true
    }

    /// Number of populated values ("elements transferred").
    #[inline]
    pub const fn elements(&self) -> usize {
        self.elements as usize
    }

    /// Free slots left.
    #[inline]
    pub const fn remaining(&self) -> usize {
        FRAME_CAPACITY - self.elements as usize
    }

    /// Populated values.
    pub fn populated(&self) -> &[i32] {
        &self.values[..self.elements()]
    }

    /// All slots, zero-filled past the populated ones.
    pub const fn values(&self) -> &[i32; FRAME_CAPACITY] {
        &self.values
    }

    /// Rebuild a frame from a reply's slot array and populated count.
    ///
    /// Slots past `populated` are forced to zero.
    pub fn from_parts(values: [i32; FRAME_CAPACITY], populated: usize) -> Self {
        let mut frame = Self::new();
        for &v in values.iter().take(populated.min(FRAME_CAPACITY)) {
            frame.push(v);
        }
        frame
    }

    /// Stream encoding: every slot as little-endian `i32`.
    pub fn to_le_bytes(&self) -> [u8; FRAME_BYTES] {
        let mut out = [0u8; FRAME_BYTES];
        for (chunk, value) in out.chunks_exact_mut(4).zip(self.values.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Decode a streamed frame.
    ///
    /// The stream carries no populated count, so every slot is reported as
    /// populated.
    pub fn from_le_bytes(bytes: &[u8; FRAME_BYTES]) -> Self {
        let mut values = [0i32; FRAME_CAPACITY];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self {
            values,
            elements: FRAME_CAPACITY as u8,
        }
    }
}
