//! Per-stage resource binding tables.
//!
//! Each shader stage owns three fixed-size slot arrays (buffers, textures,
//! samplers). No allocation happens after construction; slots are reused
//! storage that is overwritten by every bind and zeroed on stage-pipeline
//! changes or a full reset.
//!
//! Two masks are kept per category:
//!
//! - `bound` is the live occupancy mask: bit `i` is set exactly while slot
//!   `i` holds a resource. It is what the draw-time validator compares
//!   against a pipeline's required-resource mask.
//! - `pending` accumulates the slots touched since the last commit and is
//!   consumed by the flush, so only the dirty subset reaches the native
//!   encoder.

use crate::resource::{BufferId, BytesId, SamplerId, TextureId};
use kt::{PixelFormat, TextureViewDimension, MAX_BUFFERS, MAX_SAMPLERS, MAX_TEXTURES};

/// Occupancy/pending mask over buffer slots.
pub type BufferMask = u32;
/// Occupancy/pending mask over texture slots. Wider than 64 bits; always
/// iterate it with [`mask_indices`].
pub type TextureMask = u128;
/// Occupancy/pending mask over sampler slots.
pub type SamplerMask = u16;

/// Yields the set bit positions of a 64-bit mask, lowest first.
pub fn mask_indices_u64(mut mask: u64) -> impl Iterator<Item = usize> {
    std::iter::from_fn(move || {
        if mask == 0 {
            return None;
        }
        let index = mask.trailing_zeros() as usize;
        mask &= !(1u64 << index);
        Some(index)
    })
}

/// Yields the set bit positions of a 128-bit mask, lowest first.
///
/// The mask is walked one 64-bit half at a time and the high half's
/// indices are rebased by 64. Keeping the split explicit avoids the
/// off-by-one hazards of find-first-set arithmetic on the double-width
/// type.
pub fn mask_indices(mask: TextureMask) -> impl Iterator<Item = usize> {
    let lo = mask as u64;
    let hi = (mask >> 64) as u64;
    mask_indices_u64(lo).chain(mask_indices_u64(hi).map(|index| index + 64))
}

/// One buffer bind point. A slot is occupied when either the GPU buffer
/// or the side-band bytes blob is present.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferSlot {
    /// GPU buffer, if any.
    pub buffer: Option<BufferId>,
    /// Side-band CPU data bound in place of a buffer, if any.
    pub bytes: Option<BytesId>,
    /// Byte offset into the buffer.
    pub offset: u64,
    /// Bound byte length.
    pub length: u64,
}

impl BufferSlot {
    const EMPTY: BufferSlot = BufferSlot {
        buffer: None,
        bytes: None,
        offset: 0,
        length: 0,
    };

    /// Whether the slot holds anything.
    pub fn occupied(&self) -> bool {
        self.buffer.is_some() || self.bytes.is_some()
    }
}

/// Result of a slot write.
#[derive(Copy, Clone, Debug, Default)]
pub struct SlotUpdate {
    /// The stored value differed from the new one.
    pub changed: bool,
    /// The slot's pixel format changed. Only reported for buffers, and
    /// only this — not a change of buffer identity — invalidates the
    /// stage's format hash.
    pub format_changed: bool,
}

/// Buffer bind points of one stage, with the per-slot format array the
/// stage's format hash is computed from.
#[derive(Debug)]
pub struct BufferBindings {
    slots: [BufferSlot; MAX_BUFFERS],
    formats: [PixelFormat; MAX_BUFFERS],
    bound: BufferMask,
    pending: BufferMask,
    /// Hash of the formats of all typed-buffer slots the current shader
    /// declares. Recomputed by the state cache when a format dirty bit
    /// is set; zero while no shader declares typed buffers.
    pub format_hash: u32,
}

impl BufferBindings {
    pub fn new() -> Self {
        BufferBindings {
            slots: [BufferSlot::EMPTY; MAX_BUFFERS],
            formats: [PixelFormat::Unknown; MAX_BUFFERS],
            bound: 0,
            pending: 0,
            format_hash: 0,
        }
    }

    /// Writes a slot. Identical re-binds are a complete no-op.
    pub fn set(&mut self, index: usize, slot: BufferSlot, format: PixelFormat) -> SlotUpdate {
        assert!(index < MAX_BUFFERS, "buffer index {} out of range", index);

        if self.slots[index] == slot && self.formats[index] == format {
            return SlotUpdate::default();
        }

        let format_changed = self.formats[index] != format;
        self.slots[index] = slot;
        self.formats[index] = format;
        if slot.occupied() {
            self.bound |= 1 << index;
        } else {
            self.bound &= !(1 << index);
        }
        self.pending |= 1 << index;

        SlotUpdate {
            changed: true,
            format_changed,
        }
    }

    pub fn slot(&self, index: usize) -> (BufferSlot, PixelFormat) {
        assert!(index < MAX_BUFFERS, "buffer index {} out of range", index);
        (self.slots[index], self.formats[index])
    }

    pub fn formats(&self) -> &[PixelFormat; MAX_BUFFERS] {
        &self.formats
    }

    pub fn bound_mask(&self) -> BufferMask {
        self.bound
    }

    pub fn is_bound(&self, index: usize) -> bool {
        self.bound & (1 << index) != 0
    }

    /// Takes the pending mask, leaving it empty.
    pub fn take_pending(&mut self) -> BufferMask {
        std::mem::replace(&mut self.pending, 0)
    }

    /// Marks every slot pending, forcing a full re-emit at the next
    /// commit.
    pub fn mark_all_pending(&mut self) {
        self.pending = (1 << MAX_BUFFERS) - 1;
    }

    pub fn reset(&mut self) {
        *self = BufferBindings::new();
    }
}

/// One texture bind point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    /// Bound texture.
    pub texture: TextureId,
    /// Dimensionality of the bound view, checked against the shader's
    /// reflected expectation by the validator.
    pub dimension: TextureViewDimension,
}

/// Texture bind points of one stage.
#[derive(Debug)]
pub struct TextureBindings {
    slots: [Option<TextureBinding>; MAX_TEXTURES],
    bound: TextureMask,
    pending: TextureMask,
}

impl TextureBindings {
    pub fn new() -> Self {
        TextureBindings {
            slots: [None; MAX_TEXTURES],
            bound: 0,
            pending: 0,
        }
    }

    pub fn set(&mut self, index: usize, binding: Option<TextureBinding>) -> bool {
        assert!(index < MAX_TEXTURES, "texture index {} out of range", index);

        if self.slots[index] == binding {
            return false;
        }

        self.slots[index] = binding;
        if binding.is_some() {
            self.bound |= 1 << index;
        } else {
            self.bound &= !(1 << index);
        }
        self.pending |= 1 << index;
        true
    }

    pub fn get(&self, index: usize) -> Option<TextureBinding> {
        assert!(index < MAX_TEXTURES, "texture index {} out of range", index);
        self.slots[index]
    }

    pub fn bound_mask(&self) -> TextureMask {
        self.bound
    }

    pub fn is_bound(&self, index: usize) -> bool {
        self.bound & (1 << index) != 0
    }

    pub fn take_pending(&mut self) -> TextureMask {
        std::mem::replace(&mut self.pending, 0)
    }

    pub fn mark_all_pending(&mut self) {
        // The mask is exactly MAX_TEXTURES bits wide.
        self.pending = !0;
    }

    pub fn reset(&mut self) {
        *self = TextureBindings::new();
    }
}

/// Sampler bind points of one stage.
#[derive(Debug)]
pub struct SamplerBindings {
    slots: [Option<SamplerId>; MAX_SAMPLERS],
    bound: SamplerMask,
    pending: SamplerMask,
}

impl SamplerBindings {
    pub fn new() -> Self {
        SamplerBindings {
            slots: [None; MAX_SAMPLERS],
            bound: 0,
            pending: 0,
        }
    }

    pub fn set(&mut self, index: usize, sampler: Option<SamplerId>) -> bool {
        assert!(index < MAX_SAMPLERS, "sampler index {} out of range", index);

        if self.slots[index] == sampler {
            return false;
        }

        self.slots[index] = sampler;
        if sampler.is_some() {
            self.bound |= 1 << index;
        } else {
            self.bound &= !(1 << index);
        }
        self.pending |= 1 << index;
        true
    }

    pub fn get(&self, index: usize) -> Option<SamplerId> {
        assert!(index < MAX_SAMPLERS, "sampler index {} out of range", index);
        self.slots[index]
    }

    pub fn bound_mask(&self) -> SamplerMask {
        self.bound
    }

    pub fn is_bound(&self, index: usize) -> bool {
        self.bound & (1 << index) != 0
    }

    pub fn take_pending(&mut self) -> SamplerMask {
        std::mem::replace(&mut self.pending, 0)
    }

    pub fn mark_all_pending(&mut self) {
        self.pending = SamplerMask::MAX >> (16 - MAX_SAMPLERS);
    }

    pub fn reset(&mut self) {
        *self = SamplerBindings::new();
    }
}

/// The three binding tables of one shader stage.
#[derive(Debug)]
pub struct StageBindingSet {
    /// Buffer bind points.
    pub buffers: BufferBindings,
    /// Texture bind points.
    pub textures: TextureBindings,
    /// Sampler bind points.
    pub samplers: SamplerBindings,
}

impl StageBindingSet {
    pub fn new() -> Self {
        StageBindingSet {
            buffers: BufferBindings::new(),
            textures: TextureBindings::new(),
            samplers: SamplerBindings::new(),
        }
    }

    /// Zeroes every slot, mask and hash.
    pub fn reset(&mut self) {
        self.buffers.reset();
        self.textures.reset();
        self.samplers.reset();
    }

    /// Marks everything pending for a full re-emit.
    pub fn mark_all_pending(&mut self) {
        self.buffers.mark_all_pending();
        self.textures.mark_all_pending();
        self.samplers.mark_all_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kt::PixelFormat;

    fn buffer(raw: u64) -> BufferSlot {
        BufferSlot {
            buffer: BufferId::new(raw),
            bytes: None,
            offset: 0,
            length: 64,
        }
    }

    fn texture(raw: u64) -> Option<TextureBinding> {
        Some(TextureBinding {
            texture: TextureId::new(raw).unwrap(),
            dimension: TextureViewDimension::D2,
        })
    }

    #[test]
    fn identical_rebind_is_noop() {
        let mut bindings = BufferBindings::new();
        let first = bindings.set(3, buffer(1), PixelFormat::R32Float);
        assert!(first.changed && first.format_changed);
        assert_eq!(bindings.take_pending(), 1 << 3);

        let second = bindings.set(3, buffer(1), PixelFormat::R32Float);
        assert!(!second.changed && !second.format_changed);
        assert_eq!(bindings.take_pending(), 0);
        assert_eq!(bindings.bound_mask(), 1 << 3);
    }

    #[test]
    fn format_change_reported_without_identity_change() {
        let mut bindings = BufferBindings::new();
        bindings.set(0, buffer(1), PixelFormat::R32Float);
        // Same buffer, different format.
        let update = bindings.set(0, buffer(1), PixelFormat::Rg16Float);
        assert!(update.changed && update.format_changed);
        // Different buffer, same format.
        let update = bindings.set(0, buffer(2), PixelFormat::Rg16Float);
        assert!(update.changed && !update.format_changed);
    }

    #[test]
    fn unbind_clears_occupancy() {
        let mut bindings = BufferBindings::new();
        bindings.set(5, buffer(1), PixelFormat::R32Float);
        assert!(bindings.is_bound(5));
        bindings.set(5, BufferSlot::default(), PixelFormat::Unknown);
        assert!(!bindings.is_bound(5));
        assert_eq!(bindings.bound_mask(), 0);
    }

    #[test]
    fn top_buffer_slot_sets_high_bit() {
        let mut bindings = BufferBindings::new();
        bindings.set(MAX_BUFFERS - 1, buffer(1), PixelFormat::Unknown);
        assert_eq!(bindings.bound_mask(), 1 << (MAX_BUFFERS - 1));
    }

    #[test]
    fn texture_mask_crosses_word_boundary() {
        let mut bindings = TextureBindings::new();
        for &slot in &[0usize, 3, 67] {
            bindings.set(slot, texture(slot as u64 + 1));
        }
        let indices: Vec<usize> = mask_indices(bindings.bound_mask()).collect();
        assert_eq!(indices, vec![0, 3, 67]);
    }

    #[test]
    fn mask_iteration_at_word_edges() {
        let mut bindings = TextureBindings::new();
        bindings.set(63, texture(1));
        bindings.set(64, texture(2));
        bindings.set(MAX_TEXTURES - 1, texture(3));
        let indices: Vec<usize> = mask_indices(bindings.bound_mask()).collect();
        assert_eq!(indices, vec![63, 64, MAX_TEXTURES - 1]);
    }

    #[test]
    fn dimensionality_round_trips() {
        let mut bindings = TextureBindings::new();
        bindings.set(
            9,
            Some(TextureBinding {
                texture: TextureId::new(4).unwrap(),
                dimension: TextureViewDimension::Cube,
            }),
        );
        assert_eq!(
            bindings.get(9).unwrap().dimension,
            TextureViewDimension::Cube
        );
        bindings.set(9, None);
        assert!(bindings.get(9).is_none());
        assert!(!bindings.is_bound(9));
    }

    #[test]
    fn mark_all_pending_covers_every_slot() {
        let mut samplers = SamplerBindings::new();
        samplers.mark_all_pending();
        assert_eq!(
            mask_indices_u64(samplers.take_pending() as u64).count(),
            MAX_SAMPLERS
        );

        let mut textures = TextureBindings::new();
        textures.mark_all_pending();
        assert_eq!(mask_indices(textures.take_pending()).count(), MAX_TEXTURES);
    }
}
