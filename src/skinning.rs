// src/skinning.rs
//! Bounded ring of skinning matrices for deferred uploads.
//!
//! The engine thread copies bone matrices in at enqueue time and the render
//! thread reads them back by range when the deferred command runs. When the
//! next write would run past the end the cursor wraps to 0 and the tail is
//! abandoned. Nothing tracks whether an older range was consumed yet: the ring
//! must be large enough to cover one frame's worth of in-flight uploads.

use glam::Mat4;

use crate::error::{Error, Result};

pub const DEFAULT_CAPACITY: usize = 1000;

/// Location of one upload inside the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingRange {
    pub start: usize,
    pub len: usize,
}

pub struct SkinningRing {
    matrices: Vec<Mat4>,
    cursor: usize,
}

impl SkinningRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            matrices: vec![Mat4::IDENTITY; capacity],
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.matrices.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Copy `matrices` in and return where they landed.
    pub fn reserve(&mut self, matrices: &[Mat4]) -> Result<RingRange> {
        let count = matrices.len();
        if count == 0 || count > self.capacity() {
            return Err(Error::SkinningRange {
                requested: count,
                capacity: self.capacity(),
            });
        }

        if self.cursor + count > self.capacity() {
            self.cursor = 0;
        }
        let start = self.cursor;
        self.matrices[start..start + count].copy_from_slice(matrices);
        self.cursor += count;
        Ok(RingRange { start, len: count })
    }

    pub fn slice(&self, range: RingRange) -> Option<&[Mat4]> {
        self.matrices.get(range.start..range.start + range.len)
    }
}

impl Default for SkinningRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn bones(n: usize, tag: f32) -> Vec<Mat4> {
        (0..n)
            .map(|i| Mat4::from_translation(Vec3::new(tag, i as f32, 0.0)))
            .collect()
    }

    #[test]
    fn full_capacity_fits_at_zero() {
        let mut ring = SkinningRing::new(10);
        assert_eq!(ring.reserve(&bones(10, 0.0)).unwrap().start, 0);
    }

    #[test]
    fn oversize_and_empty_uploads_fail() {
        let mut ring = SkinningRing::new(10);
        let err = ring.reserve(&bones(11, 0.0)).unwrap_err();
        assert!(matches!(err, Error::SkinningRange { requested: 11, capacity: 10 }));
        assert!(ring.reserve(&[]).is_err());
        assert_eq!(ring.cursor(), 0);
    }

    #[test]
    fn wraps_when_tail_is_too_short() {
        let mut ring = SkinningRing::new(10);
        let a = ring.reserve(&bones(7, 1.0)).unwrap();
        let b = ring.reserve(&bones(5, 2.0)).unwrap();
        assert_eq!(a.start, 0);
        assert_eq!(b.start, 0);
        assert_eq!(ring.cursor(), 5);

        let got = ring.slice(b).unwrap();
        assert_eq!(got, bones(5, 2.0).as_slice());
    }

    #[test]
    fn consecutive_uploads_pack() {
        let mut ring = SkinningRing::new(10);
        ring.reserve(&bones(3, 1.0)).unwrap();
        let b = ring.reserve(&bones(4, 2.0)).unwrap();
        assert_eq!(b, RingRange { start: 3, len: 4 });
        assert_eq!(ring.slice(b).unwrap()[0], bones(4, 2.0)[0]);
    }
}
