//! Compiled pipeline resolution.
//!
//! A draw may not hit the native API until the combination of the bound
//! shader set, the index type and the element formats of every bound
//! typed buffer has been resolved to a compiled pipeline object. Those
//! objects are expensive to build, so they are shared through a
//! process-lifetime cache keyed by the combination.

use crate::binding::{mask_indices_u64, BufferMask, SamplerMask, TextureMask};
use crate::resource::{DepthStencilStateId, PipelineStateId, ShaderId};
use crate::FastHashMap;
use kt::{IndexType, PixelFormat, ShaderStage, TextureViewDimension, MAX_BUFFERS};
use parking_lot::RwLock;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// One resource argument a compiled shader reflects as used.
#[derive(Clone, Debug)]
pub enum ShaderArgument {
    /// A buffer at the given bind point.
    Buffer {
        index: u32,
        name: String,
    },
    /// Threadgroup-local memory; never bound through the table.
    ThreadgroupMemory {
        index: u32,
    },
    /// A texture, with the dimensionality the shader was compiled for.
    Texture {
        index: u32,
        dimension: TextureViewDimension,
        name: String,
    },
    /// A sampler at the given bind point.
    Sampler {
        index: u32,
        name: String,
    },
}

/// Reflection-derived binding requirements of one shader. Immutable for
/// the lifetime of the shader.
#[derive(Clone, Debug, Default)]
pub struct ShaderBindings {
    /// Every reflected argument, in reflection order.
    pub arguments: Vec<ShaderArgument>,
    /// Buffer slots the shader requires.
    pub buffer_mask: BufferMask,
    /// Texture slots the shader requires.
    pub texture_mask: TextureMask,
    /// Sampler slots the shader requires.
    pub sampler_mask: SamplerMask,
    /// Buffer slots whose element format is baked into the compiled
    /// pipeline (typed-buffer emulation).
    pub typed_buffers: BufferMask,
}

impl ShaderBindings {
    /// Derives the per-category masks from the argument list.
    pub fn from_arguments(arguments: Vec<ShaderArgument>, typed_buffers: BufferMask) -> Self {
        let mut bindings = ShaderBindings {
            arguments,
            typed_buffers,
            ..Default::default()
        };
        for argument in &bindings.arguments {
            match *argument {
                ShaderArgument::Buffer { index, .. } => {
                    bindings.buffer_mask |= 1 << index;
                }
                ShaderArgument::ThreadgroupMemory { .. } => {}
                ShaderArgument::Texture { index, .. } => {
                    bindings.texture_mask |= 1 << index;
                }
                ShaderArgument::Sampler { index, .. } => {
                    bindings.sampler_mask |= 1 << index;
                }
            }
        }
        bindings
    }

    /// Hashes the element formats of the shader's typed-buffer slots.
    ///
    /// The hash is a function of formats only. Rebinding a different
    /// buffer with the same format must not change it, and a shader with
    /// no typed buffers hashes to zero regardless of what is bound.
    pub fn binding_hash(&self, formats: &[PixelFormat; MAX_BUFFERS]) -> u32 {
        if self.typed_buffers == 0 {
            return 0;
        }
        let mut hasher = fxhash::FxHasher::default();
        for index in mask_indices_u64(self.typed_buffers as u64) {
            index.hash(&mut hasher);
            (formats[index] as u8).hash(&mut hasher);
        }
        hasher.finish() as u32
    }
}

/// A compiled shader as the state cache sees it: identity, stage and
/// reflection data.
#[derive(Debug)]
pub struct Shader {
    pub id: ShaderId,
    pub stage: ShaderStage,
    pub label: String,
    pub bindings: ShaderBindings,
}

/// The bound shader set a graphics pipeline is resolved from, together
/// with the fixed-function state it forwards into the state cache when
/// bound.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineState {
    pub id: PipelineStateId,
    pub vertex: Arc<Shader>,
    pub hull: Option<Arc<Shader>>,
    pub domain: Option<Arc<Shader>>,
    pub pixel: Option<Arc<Shader>>,
    pub depth_stencil_state: Option<DepthStencilStateId>,
    pub rasterizer: kt::RasterizerState,
}

impl GraphicsPipelineState {
    pub fn uses_tessellation(&self) -> bool {
        self.hull.is_some() && self.domain.is_some()
    }
}

/// Cache key for a compiled graphics pipeline.
///
/// Two draws with equal keys must receive the identical cached object;
/// the format hashes are part of the key because typed-buffer access
/// patterns are baked into the compiled pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub pipeline: PipelineStateId,
    pub index_type: IndexType,
    pub vertex_format_hash: u32,
    pub pixel_format_hash: u32,
    pub domain_format_hash: u32,
}

/// Cache key for a compiled compute pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComputePipelineKey {
    pub shader: ShaderId,
    pub format_hash: u32,
}

/// A compiled, immutable pipeline object: the shader set it was built
/// from plus the typed-buffer formats it was specialized against.
#[derive(Debug)]
pub struct CompiledPipeline {
    shaders: [Option<Arc<Shader>>; ShaderStage::COUNT],
    formats: [[PixelFormat; MAX_BUFFERS]; ShaderStage::COUNT],
    pub index_type: IndexType,
}

impl CompiledPipeline {
    fn specialize_render(
        state: &GraphicsPipelineState,
        index_type: IndexType,
        vertex_formats: &[PixelFormat; MAX_BUFFERS],
        pixel_formats: Option<&[PixelFormat; MAX_BUFFERS]>,
        domain_formats: Option<&[PixelFormat; MAX_BUFFERS]>,
    ) -> Self {
        let mut shaders: [Option<Arc<Shader>>; ShaderStage::COUNT] = Default::default();
        let mut formats = [[PixelFormat::Unknown; MAX_BUFFERS]; ShaderStage::COUNT];

        shaders[ShaderStage::Vertex.index()] = Some(Arc::clone(&state.vertex));
        formats[ShaderStage::Vertex.index()] = *vertex_formats;
        shaders[ShaderStage::Hull.index()] = state.hull.clone();
        shaders[ShaderStage::Domain.index()] = state.domain.clone();
        if let Some(domain_formats) = domain_formats {
            formats[ShaderStage::Domain.index()] = *domain_formats;
        }
        shaders[ShaderStage::Pixel.index()] = state.pixel.clone();
        if let Some(pixel_formats) = pixel_formats {
            formats[ShaderStage::Pixel.index()] = *pixel_formats;
        }

        CompiledPipeline {
            shaders,
            formats,
            index_type,
        }
    }

    fn specialize_compute(shader: &Arc<Shader>, compute_formats: &[PixelFormat; MAX_BUFFERS]) -> Self {
        let mut shaders: [Option<Arc<Shader>>; ShaderStage::COUNT] = Default::default();
        let mut formats = [[PixelFormat::Unknown; MAX_BUFFERS]; ShaderStage::COUNT];
        shaders[ShaderStage::Compute.index()] = Some(Arc::clone(shader));
        formats[ShaderStage::Compute.index()] = *compute_formats;

        CompiledPipeline {
            shaders,
            formats,
            index_type: IndexType::None,
        }
    }

    /// The shader occupying a stage, if any.
    pub fn shader(&self, stage: ShaderStage) -> Option<&Arc<Shader>> {
        self.shaders[stage.index()].as_ref()
    }

    /// The typed-buffer formats the stage was specialized against.
    pub fn specialized_formats(&self, stage: ShaderStage) -> &[PixelFormat; MAX_BUFFERS] {
        &self.formats[stage.index()]
    }
}

/// The process-lifetime compiled-pipeline cache.
///
/// Shared by every render context, so lookups take a read lock and only
/// insertion takes the write lock. A miss constructs the pipeline
/// entirely outside any lock and publishes the finished object under the
/// write lock, re-checking for a racing insert of the same key — a
/// lookup racing an insert must never observe a partially-built object.
///
/// There is no eviction: the asset set a process touches is finite and
/// pre-baked, and a cached pipeline must stay valid for as long as any
/// recorded draw references it.
#[derive(Debug, Default)]
pub struct PipelineCache {
    render: RwLock<FastHashMap<PipelineKey, Arc<CompiledPipeline>>>,
    compute: RwLock<FastHashMap<ComputePipelineKey, Arc<CompiledPipeline>>>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up or builds the compiled pipeline for the current graphics
    /// shader set. Idempotent and side-effect-free when the key repeats.
    pub fn get_render_pipeline(
        &self,
        state: &GraphicsPipelineState,
        index_type: IndexType,
        vertex_format_hash: u32,
        pixel_format_hash: u32,
        domain_format_hash: u32,
        vertex_formats: &[PixelFormat; MAX_BUFFERS],
        pixel_formats: Option<&[PixelFormat; MAX_BUFFERS]>,
        domain_formats: Option<&[PixelFormat; MAX_BUFFERS]>,
    ) -> Arc<CompiledPipeline> {
        profiling::scope!("PipelineCache::get_render_pipeline");

        let key = PipelineKey {
            pipeline: state.id,
            index_type,
            vertex_format_hash,
            pixel_format_hash,
            domain_format_hash,
        };

        if let Some(found) = self.render.read().get(&key) {
            return Arc::clone(found);
        }

        let built = Arc::new(CompiledPipeline::specialize_render(
            state,
            index_type,
            vertex_formats,
            pixel_formats,
            domain_formats,
        ));

        let mut cache = self.render.write();
        Arc::clone(cache.entry(key).or_insert(built))
    }

    /// Compute-side analogue of [`Self::get_render_pipeline`].
    pub fn get_compute_pipeline(
        &self,
        shader: &Arc<Shader>,
        format_hash: u32,
        formats: &[PixelFormat; MAX_BUFFERS],
    ) -> Arc<CompiledPipeline> {
        profiling::scope!("PipelineCache::get_compute_pipeline");

        let key = ComputePipelineKey {
            shader: shader.id,
            format_hash,
        };

        if let Some(found) = self.compute.read().get(&key) {
            return Arc::clone(found);
        }

        let built = Arc::new(CompiledPipeline::specialize_compute(shader, formats));

        let mut cache = self.compute.write();
        Arc::clone(cache.entry(key).or_insert(built))
    }

    /// Number of distinct graphics pipelines built so far.
    pub fn render_pipeline_count(&self) -> usize {
        self.render.read().len()
    }
}
