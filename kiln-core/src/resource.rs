//! Opaque resource identities and the surface descriptions the planner
//! consults.
//!
//! The state cache never owns the resources it binds: slots hold plain
//! copyable ids, and whoever created the resource is responsible for its
//! lifetime. The one exception is render-target attachments, which are
//! retained (`Arc`) for the duration of the pass they are bound to.

use std::num::NonZeroU64;
use std::sync::Arc;

macro_rules! define_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Wraps a raw nonzero id.
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map($name)
            }

            /// The raw id value.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }
    };
}

define_id!(
    /// Identity of a GPU buffer.
    BufferId
);
define_id!(
    /// Identity of a side-band CPU data blob bound in place of a buffer.
    BytesId
);
define_id!(
    /// Identity of a texture.
    TextureId
);
define_id!(
    /// Identity of a sampler state object.
    SamplerId
);
define_id!(
    /// Identity of a depth/stencil state object.
    DepthStencilStateId
);
define_id!(
    /// Identity of a compiled shader.
    ShaderId
);
define_id!(
    /// Identity of a graphics pipeline state description.
    PipelineStateId
);

/// Everything the render-target planner needs to know about a texture.
///
/// Mirrors the surface layout of the backends this tracker serves: a
/// resolved base texture plus optional companion surfaces for the
/// multisampled contents, a dedicated resolve target and a separate
/// stencil view of combined formats.
#[derive(Clone, Debug)]
pub struct TextureInfo {
    /// Identity.
    pub id: TextureId,
    /// Pixel format.
    pub format: kt::PixelFormat,
    /// View dimensionality.
    pub dimension: kt::TextureViewDimension,
    /// Top-mip width in pixels.
    pub width: u32,
    /// Top-mip height in pixels.
    pub height: u32,
    /// Array layers (faces for cube maps, depth slices for volumes).
    pub array_layers: u32,
    /// Samples per pixel of the base texture.
    pub sample_count: u32,
    /// Multisampled companion surface rendered into before resolve.
    pub msaa: Option<Arc<TextureInfo>>,
    /// Dedicated resolve target; resolve falls back to the base texture
    /// when absent.
    pub msaa_resolve: Option<Arc<TextureInfo>>,
    /// Separate stencil view for combined depth/stencil formats.
    pub stencil: Option<Arc<TextureInfo>>,
}

impl TextureInfo {
    /// A plain single-sampled 2D surface with no companions.
    pub fn new_2d(id: TextureId, format: kt::PixelFormat, width: u32, height: u32) -> Self {
        TextureInfo {
            id,
            format,
            dimension: kt::TextureViewDimension::D2,
            width,
            height,
            array_layers: 1,
            sample_count: 1,
            msaa: None,
            msaa_resolve: None,
            stencil: None,
        }
    }

    /// Mip dimensions, clamped to one pixel.
    pub fn mip_extent(&self, mip: u32) -> kt::Extent {
        kt::Extent {
            width: (self.width >> mip).max(1),
            height: (self.height >> mip).max(1),
        }
    }

    /// Number of layers a layered view renders into.
    pub fn render_layers(&self) -> u32 {
        if self.dimension.is_layered() {
            self.array_layers
        } else {
            1
        }
    }
}
