//! Per-frame uniform storage.
//!
//! A [`UniformRing`] is one uniform buffer holding a copy of `T` for every
//! (frame slot, entry) pair. Passes bind it once with a dynamic offset, and
//! the CPU only ever writes the copies of the slot that
//! [`FramePipeline::begin_frame`](super::FramePipeline::begin_frame) just
//! handed out.
//!
//! ```text
//! frames = 3, entries_per_frame = 2, stride = 256
//!
//! | slot0/e0 | slot0/e1 | slot1/e0 | slot1/e1 | slot2/e0 | slot2/e1 |
//! 0         256        512        768       1024       1280       1536
//! ```

use crate::backend::traits::*;
use crate::backend::types::*;
use bytemuck::Pod;
use std::marker::PhantomData;

/// Minimum dynamic uniform offset alignment guaranteed by wgpu's default limits.
pub const UNIFORM_ALIGNMENT: u64 = 256;

/// Round `value` up to the next multiple of `alignment` (a power of two).
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Offset arithmetic of a uniform ring, independent of any GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    element_size: u64,
    stride: u64,
    frames: usize,
    entries_per_frame: usize,
}

impl RingLayout {
    /// # Panics
    ///
    /// Panics if `frames`, `entries_per_frame` or `element_size` is 0.
    pub fn new(element_size: u64, frames: usize, entries_per_frame: usize) -> Self {
        assert!(element_size > 0, "uniform element must not be empty");
        assert!(frames > 0, "frames must be at least 1");
        assert!(entries_per_frame > 0, "entries_per_frame must be at least 1");

        Self {
            element_size,
            stride: align_up(element_size, UNIFORM_ALIGNMENT),
            frames,
            entries_per_frame,
        }
    }

    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn entries_per_frame(&self) -> usize {
        self.entries_per_frame
    }

    pub fn total_size(&self) -> u64 {
        self.stride * (self.frames * self.entries_per_frame) as u64
    }

    /// Byte offset of the copy used by `entry` in frame `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` or `entry` is out of range.
    pub fn offset(&self, slot: usize, entry: usize) -> u64 {
        assert!(slot < self.frames, "Invalid slot index");
        assert!(entry < self.entries_per_frame, "Invalid entry index");
        (slot * self.entries_per_frame + entry) as u64 * self.stride
    }
}

/// Dynamic-offset uniform buffer rotated per frame slot.
#[derive(Debug)]
pub struct UniformRing<T: Pod> {
    buffer: BufferHandle,
    layout: RingLayout,
    _marker: PhantomData<T>,
}

impl<T: Pod> Clone for UniformRing<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Pod> Copy for UniformRing<T> {}

impl<T: Pod> UniformRing<T> {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        label: &str,
        frames: usize,
        entries_per_frame: usize,
    ) -> BackendResult<Self> {
        let layout = RingLayout::new(
            std::mem::size_of::<T>() as u64,
            frames,
            entries_per_frame,
        );
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(label.to_string()),
            size: layout.total_size(),
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;

        log::debug!(
            "Uniform ring '{}': {} frames x {} entries, stride {}",
            label,
            frames,
            entries_per_frame,
            layout.stride()
        );

        Ok(Self {
            buffer,
            layout,
            _marker: PhantomData,
        })
    }

    /// Upload `value` into the copy owned by (`slot`, `entry`).
    pub fn write<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        slot: usize,
        entry: usize,
        value: &T,
    ) {
        backend.write_buffer(
            self.buffer,
            self.layout.offset(slot, entry),
            bytemuck::bytes_of(value),
        );
    }

    /// Dynamic offset to pass to `set_bind_group`.
    pub fn offset(&self, slot: usize, entry: usize) -> u32 {
        self.layout.offset(slot, entry) as u32
    }

    /// Bind group entry exposing one `T` at a time.
    pub fn binding(&self) -> BindGroupEntry {
        BindGroupEntry::Buffer {
            buffer: self.buffer,
            offset: 0,
            size: Some(self.layout.element_size()),
        }
    }

    /// Layout entry type matching [`binding`](Self::binding).
    pub fn binding_type(&self) -> BindingType {
        BindingType::DynamicUniformBuffer {
            size: self.layout.element_size(),
        }
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 256)]
    #[case(256, 256)]
    #[case(257, 512)]
    #[case(272, 512)]
    fn test_align_up(#[case] value: u64, #[case] expected: u64) {
        assert_eq!(align_up(value, UNIFORM_ALIGNMENT), expected);
    }

    #[test]
    fn test_layout_offsets_do_not_overlap() {
        let layout = RingLayout::new(272, 3, 2);
        assert_eq!(layout.stride(), 512);
        assert_eq!(layout.total_size(), 512 * 6);

        let mut offsets: Vec<u64> = (0..3)
            .flat_map(|slot| (0..2).map(move |entry| (slot, entry)))
            .map(|(slot, entry)| layout.offset(slot, entry))
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        assert_eq!(offsets.len(), 6);
        assert!(offsets.iter().all(|o| o % UNIFORM_ALIGNMENT == 0));
        assert!(offsets
            .iter()
            .all(|o| o + layout.element_size() <= layout.total_size()));
    }

    #[test]
    fn test_slots_are_disjoint() {
        let layout = RingLayout::new(64, 2, 4);
        let slot0_end = layout.offset(0, 3) + layout.stride();
        assert_eq!(layout.offset(1, 0), slot0_end);
    }

    #[test]
    #[should_panic(expected = "Invalid slot index")]
    fn test_offset_rejects_bad_slot() {
        RingLayout::new(64, 2, 1).offset(2, 0);
    }

    #[test]
    #[should_panic(expected = "frames must be at least 1")]
    fn test_zero_frames() {
        RingLayout::new(64, 0, 1);
    }

    #[test]
    fn test_write_lands_in_slot_copy() {
        let mut backend = MockBackend::new(1, 1);
        let ring = UniformRing::<[f32; 4]>::new(&mut backend, "test ring", 3, 1).unwrap();

        ring.write(&mut backend, 1, 0, &[1.0, 2.0, 3.0, 4.0]);

        let bytes = backend.buffer_bytes(ring.buffer());
        assert_eq!(bytes.len() as u64, ring.layout().total_size());
        let start = ring.offset(1, 0) as usize;
        let written: &[f32] = bytemuck::cast_slice(&bytes[start..start + 16]);
        assert_eq!(written, &[1.0, 2.0, 3.0, 4.0]);
        // Other slots untouched
        assert!(bytes[..start].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_binding_exposes_one_element() {
        let mut backend = MockBackend::new(1, 1);
        let ring = UniformRing::<[f32; 4]>::new(&mut backend, "test ring", 2, 1).unwrap();

        match ring.binding() {
            BindGroupEntry::Buffer { size, offset, .. } => {
                assert_eq!(size, Some(16));
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }
}
