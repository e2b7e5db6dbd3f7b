/*! This library describes the state surface of the kiln render core that is
 *  agnostic of the backend: formats, actions, stages, capability flags and
 *  the fixed binding limits every backend in the closed set shares.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
)]
#![warn(missing_docs, unsafe_op_in_unsafe_fn)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Buffer bind points available to one shader stage.
pub const MAX_BUFFERS: usize = 31;
/// Texture bind points available to one shader stage.
///
/// Note that this exceeds 64: the occupancy mask for textures is 128 bits
/// wide and is iterated one 64-bit half at a time.
pub const MAX_TEXTURES: usize = 128;
/// Sampler bind points available to one shader stage.
pub const MAX_SAMPLERS: usize = 16;
/// Color render targets that may be simultaneously bound.
pub const MAX_COLOR_TARGETS: usize = 8;

/// The programmable pipeline stages tracked by the state cache.
///
/// The numeric value is the index into every per-stage table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex = 0,
    /// Hull (tessellation control) shader.
    Hull = 1,
    /// Domain (tessellation evaluation) shader.
    Domain = 2,
    /// Pixel (fragment) shader.
    Pixel = 3,
    /// Compute shader.
    Compute = 4,
}

impl ShaderStage {
    /// Number of tracked stages.
    pub const COUNT: usize = 5;

    /// All stages, in table order.
    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::Hull,
        ShaderStage::Domain,
        ShaderStage::Pixel,
        ShaderStage::Compute,
    ];

    /// Index of this stage into per-stage tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Pixel formats understood by the state tracker.
///
/// Only the identity of the format matters here: typed-buffer emulation
/// bakes the element format into the compiled pipeline, so the format is
/// part of the pipeline cache key on such backends.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PixelFormat {
    /// No format; the value a cleared binding slot reports.
    Unknown = 0,
    /// Single 8-bit normalized channel.
    R8Unorm,
    /// Single 8-bit unsigned integer channel.
    R8Uint,
    /// Two 8-bit normalized channels.
    Rg8Unorm,
    /// Four 8-bit normalized channels.
    Rgba8Unorm,
    /// Four 8-bit normalized channels, blue first.
    Bgra8Unorm,
    /// Single half-float channel.
    R16Float,
    /// Single 16-bit unsigned integer channel.
    R16Uint,
    /// Two half-float channels.
    Rg16Float,
    /// Four half-float channels.
    Rgba16Float,
    /// Single float channel.
    R32Float,
    /// Single 32-bit unsigned integer channel.
    R32Uint,
    /// Single 32-bit signed integer channel.
    R32Sint,
    /// Two float channels.
    Rg32Float,
    /// Four float channels.
    Rgba32Float,
    /// 10:10:10:2 normalized.
    Rgb10a2Unorm,
    /// 11:11:10 small floats.
    Rg11b10Float,
    /// 32-bit float depth.
    Depth32Float,
    /// 8-bit stencil.
    Stencil8,
    /// 32-bit float depth with 8-bit stencil.
    Depth32FloatStencil8,
    /// 24-bit normalized depth with 8-bit stencil.
    Depth24UnormStencil8,
}

impl PixelFormat {
    /// Whether the format carries a depth aspect.
    pub fn has_depth(self) -> bool {
        match self {
            PixelFormat::Depth32Float
            | PixelFormat::Depth32FloatStencil8
            | PixelFormat::Depth24UnormStencil8 => true,
            _ => false,
        }
    }

    /// Whether the format carries a stencil aspect.
    pub fn has_stencil(self) -> bool {
        match self {
            PixelFormat::Stencil8
            | PixelFormat::Depth32FloatStencil8
            | PixelFormat::Depth24UnormStencil8 => true,
            _ => false,
        }
    }

    /// Whether the format is usable as a depth/stencil attachment.
    pub fn is_depth_stencil(self) -> bool {
        self.has_depth() || self.has_stencil()
    }
}

/// Dimensionality of a texture view as a shader consumes it.
///
/// The draw-time validator compares the bound dimensionality against the
/// one the shader reflects: a 2D texture where a cube map is expected is a
/// guaranteed native-API crash, not merely a rendering artifact.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TextureViewDimension {
    /// 1D texture.
    D1,
    /// 2D texture.
    D2,
    /// 2D array texture.
    D2Array,
    /// Cube map.
    Cube,
    /// Cube map array.
    CubeArray,
    /// Volume texture.
    D3,
}

impl TextureViewDimension {
    /// Whether views of this dimensionality expose render layers.
    pub fn is_layered(self) -> bool {
        match self {
            TextureViewDimension::D2Array
            | TextureViewDimension::Cube
            | TextureViewDimension::CubeArray
            | TextureViewDimension::D3 => true,
            _ => false,
        }
    }
}

/// Index buffer element type. Part of the compiled pipeline key on
/// backends that specialize the vertex fetch per index width.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IndexType {
    /// Non-indexed draw.
    None = 0,
    /// 16-bit indices.
    U16 = 1,
    /// 32-bit indices.
    U32 = 2,
}

impl IndexType {
    /// Number of index type variants.
    pub const COUNT: usize = 3;
}

/// What the hardware does with an attachment's prior contents at the start
/// of a pass.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LoadAction {
    /// Contents are undefined at pass start.
    DontCare,
    /// Prior contents are preserved.
    Load,
    /// The attachment is cleared to its clear value.
    Clear,
}

/// The requested end-of-pass behavior for an attachment, before the
/// planner resolves it against device features and multisampling.
///
/// The derived ordering is meaningful: a later variant is a strictly
/// stronger request, and a store-action *increase* on an active pass can
/// sometimes be honored without restarting the pass.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StoreAction {
    /// Contents may be discarded.
    DontCare = 0,
    /// Contents must be kept.
    Store = 1,
    /// Multisampled contents must be resolved into the resolve target.
    MultisampleResolve = 2,
}

/// The store action actually programmed into a pass descriptor.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResolvedStoreAction {
    /// Discard.
    DontCare,
    /// Keep.
    Store,
    /// Resolve, discarding the multisampled contents.
    MultisampleResolve,
    /// Keep the multisampled contents and resolve.
    StoreAndMultisampleResolve,
    /// Defer the decision to end-of-pass; only valid when the device
    /// supports deferred store actions.
    Deferred,
}

/// Which aspects of the depth/stencil attachment the pass reads or writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DepthStencilAccess {
    bits: u8,
}

impl DepthStencilAccess {
    const DEPTH_READ: u8 = 1 << 0;
    const DEPTH_WRITE: u8 = 1 << 1;
    const STENCIL_READ: u8 = 1 << 2;
    const STENCIL_WRITE: u8 = 1 << 3;

    /// Neither aspect is used.
    pub const NONE: Self = Self { bits: 0 };
    /// Both aspects readable and writable.
    pub const DEPTH_STENCIL_WRITE: Self = Self {
        bits: Self::DEPTH_READ | Self::DEPTH_WRITE | Self::STENCIL_READ | Self::STENCIL_WRITE,
    };
    /// Both aspects read-only.
    pub const DEPTH_STENCIL_READ: Self = Self {
        bits: Self::DEPTH_READ | Self::STENCIL_READ,
    };
    /// Depth read/write, stencil unused.
    pub const DEPTH_WRITE_ONLY: Self = Self {
        bits: Self::DEPTH_READ | Self::DEPTH_WRITE,
    };
    /// Stencil read/write, depth unused.
    pub const STENCIL_WRITE_ONLY: Self = Self {
        bits: Self::STENCIL_READ | Self::STENCIL_WRITE,
    };

    /// The pass touches the depth aspect.
    pub fn is_using_depth(self) -> bool {
        self.bits & (Self::DEPTH_READ | Self::DEPTH_WRITE) != 0
    }

    /// The pass writes the depth aspect.
    pub fn is_depth_write(self) -> bool {
        self.bits & Self::DEPTH_WRITE != 0
    }

    /// The pass touches the stencil aspect.
    pub fn is_using_stencil(self) -> bool {
        self.bits & (Self::STENCIL_READ | Self::STENCIL_WRITE) != 0
    }

    /// The pass writes the stencil aspect.
    pub fn is_stencil_write(self) -> bool {
        self.bits & Self::STENCIL_WRITE != 0
    }
}

bitflags::bitflags! {
    /// Optional device capabilities the planner and pipeline resolver
    /// consult. Queried once at device creation and injected.
    pub struct DeviceFeatures: u32 {
        /// Store actions may be left unknown on the pass descriptor and
        /// supplied when the encoder ends.
        const DEFERRED_STORE_ACTIONS = 1 << 0;
        /// A multisampled attachment can be stored *and* resolved in one
        /// end-of-pass action.
        const MSAA_STORE_AND_RESOLVE = 1 << 1;
        /// Depth attachments support multisample resolve.
        const MSAA_DEPTH_RESOLVE = 1 << 2;
        /// The multisampled surface and its resolve target may be
        /// distinct textures.
        const SEPARATE_MSAA_RESOLVE_TARGET = 1 << 3;
        /// Rendering into texture array layers in one pass.
        const LAYERED_RENDERING = 1 << 4;
        /// Combined depth/stencil surfaces remain usable through the
        /// sample-count mismatch fixup path.
        const COMBINED_DEPTH_STENCIL = 1 << 5;
    }
}

/// The capability table a device reports for binding slots. Must not
/// exceed the compile-time maxima the tracker's tables are sized for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Limits {
    /// Buffer bind points per stage.
    pub max_buffers: u32,
    /// Texture bind points per stage.
    pub max_textures: u32,
    /// Sampler bind points per stage.
    pub max_samplers: u32,
    /// Simultaneous color render targets.
    pub max_color_targets: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_buffers: MAX_BUFFERS as u32,
            max_textures: MAX_TEXTURES as u32,
            max_samplers: MAX_SAMPLERS as u32,
            max_color_targets: MAX_COLOR_TARGETS as u32,
        }
    }
}

impl Limits {
    /// True when any limit exceeds what the fixed tables can hold.
    pub fn exceeds_supported(&self) -> bool {
        self.max_buffers > MAX_BUFFERS as u32
            || self.max_textures > MAX_TEXTURES as u32
            || self.max_samplers > MAX_SAMPLERS as u32
            || self.max_color_targets > MAX_COLOR_TARGETS as u32
    }
}

/// Runtime debugging level.
///
/// Levels are strictly ordered: every facility enabled at level `n` is
/// also enabled at any level above `n`. Consumers test `level >=
/// threshold`; validation strength is monotonic in the level.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DebugLevel {
    /// No debug facilities.
    Off = 0,
    /// Track resource lifetimes only.
    TrackResources = 1,
    /// Cheap mask-subset binding validation before draws.
    FastValidation = 2,
    /// Full reflection-driven binding validation, including texture
    /// dimensionality checks.
    Validation = 3,
    /// Additionally log encoder operations.
    LogOperations = 4,
    /// Additionally wait for each command buffer to complete.
    WaitForComplete = 5,
    /// Additionally submit conditionally for fault isolation.
    ConditionalSubmit = 6,
}

/// Face culling mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CullMode {
    /// No culling.
    None,
    /// Cull front faces.
    Front,
    /// Cull back faces.
    Back,
}

/// Triangle rasterization fill mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FillMode {
    /// Filled triangles.
    Solid,
    /// Wireframe.
    Wireframe,
    /// Vertices only.
    Point,
}

/// Winding order of front faces.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Winding {
    /// Clockwise front faces.
    Clockwise,
    /// Counter-clockwise front faces.
    CounterClockwise,
}

/// Fixed-function rasterizer state.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RasterizerState {
    /// Fill mode.
    pub fill_mode: FillMode,
    /// Cull mode.
    pub cull_mode: CullMode,
    /// Constant depth bias.
    pub depth_bias: f32,
    /// Slope-scaled depth bias.
    pub slope_scale_depth_bias: f32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        RasterizerState {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::None,
            depth_bias: 0.0,
            slope_scale_depth_bias: 0.0,
        }
    }
}

/// RGBA color, used for the blend constant.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Color {
    /// Red.
    pub r: f32,
    /// Green.
    pub g: f32,
    /// Blue.
    pub b: f32,
    /// Alpha.
    pub a: f32,
}

impl Color {
    /// Fully transparent black.
    pub const TRANSPARENT: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };
}

/// Viewport rectangle with depth range.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
    /// Near depth.
    pub min_depth: f32,
    /// Far depth.
    pub max_depth: f32,
}

/// Scissor rectangle in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScissorRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// 2D extent in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Extent {
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

#[test]
fn store_action_strength_is_ordered() {
    assert!(StoreAction::DontCare < StoreAction::Store);
    assert!(StoreAction::Store < StoreAction::MultisampleResolve);
}

#[test]
fn debug_levels_are_ordered() {
    assert!(DebugLevel::Off < DebugLevel::FastValidation);
    assert!(DebugLevel::FastValidation < DebugLevel::Validation);
    assert!(DebugLevel::Validation < DebugLevel::ConditionalSubmit);
}

#[test]
fn depth_stencil_access_aspects() {
    let rw = DepthStencilAccess::DEPTH_STENCIL_WRITE;
    assert!(rw.is_depth_write() && rw.is_stencil_write());
    let ro = DepthStencilAccess::DEPTH_STENCIL_READ;
    assert!(ro.is_using_depth() && !ro.is_depth_write());
    assert!(ro.is_using_stencil() && !ro.is_stencil_write());
    assert!(!DepthStencilAccess::NONE.is_using_depth());
}
