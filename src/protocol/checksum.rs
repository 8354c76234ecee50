//! The XYE additive checksum: `0xff - (sum of covered bytes mod 256)`.
//!
//! The checksum byte sits second-to-last in every frame and covers every other byte
//! of the frame, the end marker included.

pub trait Checksum {
    fn checksum(self) -> u8;
}

impl<'a, I> Checksum for I where
    I: Iterator<Item = &'a u8>
{
    fn checksum(self) -> u8 {
        0xff - self.fold(0u8, |acc, byte| acc.wrapping_add(*byte))
    }
}

/// `0xff - sum(bytes) mod 256` over an arbitrary slice.
pub fn checksum_of(bytes: &[u8]) -> u8 {
    bytes.iter().checksum()
}

/// Index of the checksum byte within a frame of `len` bytes.
fn checksum_index(len: usize) -> Option<usize> {
    len.checked_sub(2)
}

/// Compute the checksum for `frame`, skipping the checksum slot itself.
///
/// Frames shorter than two bytes have no checksum slot and yield `None`.
pub fn compute(frame: &[u8]) -> Option<u8> {
    let idx = checksum_index(frame.len())?;

    Some(frame[..idx].iter().chain(&frame[idx + 1..]).checksum())
}

/// Recompute the checksum of `frame` and compare it against the stored byte.
pub fn verify(frame: &[u8]) -> bool {
    match (compute(frame), checksum_index(frame.len())) {
        (Some(expected), Some(idx)) => frame[idx] == expected,
        _ => false,
    }
}

/// Write the checksum for `frame` into its checksum slot.
pub(crate) fn seal(frame: &mut [u8]) {
    if let (Some(checksum), Some(idx)) = (compute(frame), checksum_index(frame.len())) {
        frame[idx] = checksum;
    }
}
