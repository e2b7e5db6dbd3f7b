//! The command-encoder state cache.
//!
//! Every state setter is pure CPU bookkeeping: it compares against the
//! stored value, stores the new one, and marks a dirty bit. Nothing
//! touches the native API until one of the flush entry points walks the
//! dirty bits and emits exactly the changed subset into a
//! [`CommandSink`]. Redundant setter calls are therefore free, and a
//! torn-down encoder is re-armed with a single [`StateCache::set_state_dirty`].
//!
//! Raster state and pipeline state are tracked by two disjoint masks:
//! raster bits map one-to-one onto native encoder calls, while pipeline
//! bits additionally gate the per-stage format-hash recomputation that
//! feeds the pipeline cache key.

use crate::binding::{mask_indices, mask_indices_u64, BufferSlot, StageBindingSet, TextureBinding};
use crate::encoder::CommandSink;
use crate::pipeline::{CompiledPipeline, GraphicsPipelineState, PipelineCache, Shader};
use crate::render_pass::{RenderPassState, RenderTargetError, RenderTargetsInfo};
use crate::resource::{BufferId, BytesId, DepthStencilStateId, SamplerId};
use crate::validation::validate_stage;
use kt::{
    Color, DebugLevel, DeviceFeatures, IndexType, Limits, PixelFormat, RasterizerState,
    ScissorRect, ShaderStage, Viewport, Winding,
};
use std::sync::Arc;

bitflags::bitflags! {
    /// Raster state that changed since the last flush. Each bit maps to
    /// exactly one native encoder call.
    pub struct RasterFlags: u32 {
        const VIEWPORT = 1 << 0;
        const FRONT_FACING_WINDING = 1 << 1;
        const CULL_MODE = 1 << 2;
        const DEPTH_BIAS = 1 << 3;
        const SCISSOR_RECT = 1 << 4;
        const FILL_MODE = 1 << 5;
        const BLEND_COLOR = 1 << 6;
        const DEPTH_STENCIL_STATE = 1 << 7;
        const STENCIL_REFERENCE = 1 << 8;
    }
}

bitflags::bitflags! {
    /// Pipeline-affecting state that changed since the last flush.
    pub struct PipelineFlags: u32 {
        const PIPELINE_STATE = 1 << 0;
        const VERTEX_BUFFER_FORMATS = 1 << 1;
        const PIXEL_BUFFER_FORMATS = 1 << 2;
        const DOMAIN_BUFFER_FORMATS = 1 << 3;
        const COMPUTE_SHADER = 1 << 4;
        const COMPUTE_BUFFER_FORMATS = 1 << 5;

        /// The bits consumed by the graphics pipeline flush.
        const RASTER_MASK = Self::PIPELINE_STATE.bits
            | Self::VERTEX_BUFFER_FORMATS.bits
            | Self::PIXEL_BUFFER_FORMATS.bits
            | Self::DOMAIN_BUFFER_FORMATS.bits;
        /// The bits consumed by the compute pipeline flush.
        const COMPUTE_MASK = Self::COMPUTE_SHADER.bits | Self::COMPUTE_BUFFER_FORMATS.bits;
    }
}

/// Which pipeline bit a buffer-format change on a stage raises. Hull
/// buffer formats never specialize a pipeline, so hull maps to nothing.
fn stage_format_flag(stage: ShaderStage) -> PipelineFlags {
    match stage {
        ShaderStage::Vertex => PipelineFlags::VERTEX_BUFFER_FORMATS,
        ShaderStage::Hull => PipelineFlags::empty(),
        ShaderStage::Domain => PipelineFlags::DOMAIN_BUFFER_FORMATS,
        ShaderStage::Pixel => PipelineFlags::PIXEL_BUFFER_FORMATS,
        ShaderStage::Compute => PipelineFlags::COMPUTE_BUFFER_FORMATS,
    }
}

/// The per-context state cache. One per render context; all mutation
/// happens on that context's thread.
#[derive(Debug)]
pub struct StateCache {
    limits: Limits,
    stages: [StageBindingSet; ShaderStage::COUNT],
    raster_bits: RasterFlags,
    pipeline_bits: PipelineFlags,

    viewport: Viewport,
    scissor: ScissorRect,
    scissor_enabled: bool,
    rasterizer: Option<RasterizerState>,
    depth_stencil_state: Option<DepthStencilStateId>,
    stencil_ref: u32,
    blend_color: Color,
    index_type: IndexType,

    graphics_pipeline: Option<Arc<GraphicsPipelineState>>,
    compute_shader: Option<Arc<Shader>>,
    using_tessellation: bool,

    // The most recently flushed compiled pipelines. Holding them here
    // guarantees a handle is never invalidated while a recorded draw
    // still references it.
    render_pipeline: Option<Arc<CompiledPipeline>>,
    compute_pipeline: Option<Arc<CompiledPipeline>>,

    pass: RenderPassState,
}

impl StateCache {
    pub fn new(features: DeviceFeatures, limits: Limits) -> Self {
        assert!(
            !limits.exceeds_supported(),
            "device limits exceed the fixed binding table sizes"
        );
        StateCache {
            limits,
            stages: [
                StageBindingSet::new(),
                StageBindingSet::new(),
                StageBindingSet::new(),
                StageBindingSet::new(),
                StageBindingSet::new(),
            ],
            raster_bits: RasterFlags::empty(),
            pipeline_bits: PipelineFlags::empty(),
            viewport: Viewport::default(),
            scissor: ScissorRect::default(),
            scissor_enabled: false,
            rasterizer: None,
            depth_stencil_state: None,
            stencil_ref: 0,
            blend_color: Color::TRANSPARENT,
            index_type: IndexType::None,
            graphics_pipeline: None,
            compute_shader: None,
            using_tessellation: false,
            render_pipeline: None,
            compute_pipeline: None,
            pass: RenderPassState::new(features),
        }
    }

    pub fn stage_bindings(&self, stage: ShaderStage) -> &StageBindingSet {
        &self.stages[stage.index()]
    }

    pub fn graphics_pipeline(&self) -> Option<&Arc<GraphicsPipelineState>> {
        self.graphics_pipeline.as_ref()
    }

    pub fn compute_shader(&self) -> Option<&Arc<Shader>> {
        self.compute_shader.as_ref()
    }

    pub fn render_pipeline(&self) -> Option<&Arc<CompiledPipeline>> {
        self.render_pipeline.as_ref()
    }

    pub fn compute_pipeline(&self) -> Option<&Arc<CompiledPipeline>> {
        self.compute_pipeline.as_ref()
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn raster_bits(&self) -> RasterFlags {
        self.raster_bits
    }

    pub fn pipeline_bits(&self) -> PipelineFlags {
        self.pipeline_bits
    }

    /// The render-target planner for the active pass.
    pub fn render_pass(&self) -> &RenderPassState {
        &self.pass
    }

    pub fn render_pass_mut(&mut self) -> &mut RenderPassState {
        &mut self.pass
    }

    // --- Binding table setters -------------------------------------------

    /// Binds a buffer (or side-band bytes) to a stage slot. A call that
    /// matches the stored slot exactly is a complete no-op. Only a
    /// *format* change invalidates the stage's format hash; rebinding a
    /// different buffer with the same format does not.
    pub fn set_shader_buffer(
        &mut self,
        stage: ShaderStage,
        buffer: Option<BufferId>,
        bytes: Option<BytesId>,
        offset: u64,
        length: u64,
        index: u32,
        format: PixelFormat,
    ) {
        assert!(index < self.limits.max_buffers, "buffer index {} out of range", index);
        let slot = BufferSlot {
            buffer,
            bytes,
            offset,
            length,
        };
        let update = self.stages[stage.index()].buffers.set(index as usize, slot, format);
        if update.format_changed {
            self.pipeline_bits |= stage_format_flag(stage);
        }
    }

    pub fn set_shader_texture(
        &mut self,
        stage: ShaderStage,
        texture: Option<TextureBinding>,
        index: u32,
    ) {
        assert!(index < self.limits.max_textures, "texture index {} out of range", index);
        self.stages[stage.index()].textures.set(index as usize, texture);
    }

    pub fn set_shader_sampler(&mut self, stage: ShaderStage, sampler: Option<SamplerId>, index: u32) {
        assert!(index < self.limits.max_samplers, "sampler index {} out of range", index);
        self.stages[stage.index()].samplers.set(index as usize, sampler);
    }

    // --- Raster state setters --------------------------------------------

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.viewport != viewport {
            self.viewport = viewport;
            self.raster_bits |= RasterFlags::VIEWPORT;
        }

        if !self.scissor_enabled {
            let rect = ScissorRect {
                x: viewport.x as u32,
                y: viewport.y as u32,
                width: viewport.width as u32,
                height: viewport.height as u32,
            };
            self.set_scissor_rect(false, rect);
        }
    }

    pub fn set_scissor_rect(&mut self, enable: bool, rect: ScissorRect) {
        if self.scissor_enabled != enable || self.scissor != rect {
            self.scissor_enabled = enable;
            let mut scissor = if enable {
                rect
            } else {
                ScissorRect {
                    x: self.viewport.x as u32,
                    y: self.viewport.y as u32,
                    width: self.viewport.width as u32,
                    height: self.viewport.height as u32,
                }
            };

            // Clamp to the framebuffer; the native API rejects larger
            // scissor rects.
            let framebuffer = self.pass.framebuffer_size();
            scissor.width = if scissor.x + scissor.width <= framebuffer.width {
                scissor.width
            } else {
                framebuffer.width.saturating_sub(scissor.x)
            }
            .max(1);
            scissor.height = if scissor.y + scissor.height <= framebuffer.height {
                scissor.height
            } else {
                framebuffer.height.saturating_sub(scissor.y)
            }
            .max(1);

            self.scissor = scissor;
            self.raster_bits |= RasterFlags::SCISSOR_RECT;
        }
    }

    pub fn set_blend_factor(&mut self, blend_color: Color) {
        if self.blend_color != blend_color {
            self.blend_color = blend_color;
            self.raster_bits |= RasterFlags::BLEND_COLOR;
        }
    }

    pub fn set_stencil_ref(&mut self, stencil_ref: u32) {
        if self.stencil_ref != stencil_ref {
            self.stencil_ref = stencil_ref;
            self.raster_bits |= RasterFlags::STENCIL_REFERENCE;
        }
    }

    pub fn set_depth_stencil_state(&mut self, state: Option<DepthStencilStateId>) {
        if self.depth_stencil_state != state {
            self.depth_stencil_state = state;
            self.raster_bits |= RasterFlags::DEPTH_STENCIL_STATE;
        }
    }

    pub fn set_rasterizer_state(&mut self, state: RasterizerState) {
        if self.rasterizer != Some(state) {
            self.rasterizer = Some(state);
            self.raster_bits |= RasterFlags::FRONT_FACING_WINDING
                | RasterFlags::CULL_MODE
                | RasterFlags::DEPTH_BIAS
                | RasterFlags::FILL_MODE;
        }
    }

    // --- Pipeline setters ------------------------------------------------

    pub fn set_index_type(&mut self, index_type: IndexType) {
        if self.index_type != index_type {
            self.index_type = index_type;
            self.pipeline_bits |= PipelineFlags::PIPELINE_STATE;
        }
    }

    pub fn set_graphics_pipeline(&mut self, state: Arc<GraphicsPipelineState>) {
        let changed = self
            .graphics_pipeline
            .as_ref()
            .map_or(true, |current| current.id != state.id);
        if !changed {
            return;
        }

        let new_tessellation = state.uses_tessellation();
        if new_tessellation != self.using_tessellation {
            for set in self.stages.iter_mut() {
                set.mark_all_pending();
            }
        }
        // Whenever the pipeline changes and a hull shader is bound,
        // clear the hull bindings: a previous pipeline's hull resources
        // with a different binding table would otherwise overwrite the
        // vertex bindings of the new pipeline.
        if new_tessellation {
            let hull = &mut self.stages[ShaderStage::Hull.index()];
            hull.reset();
            hull.mark_all_pending();
        }
        self.using_tessellation = new_tessellation;

        self.pipeline_bits |= PipelineFlags::PIPELINE_STATE;

        self.set_depth_stencil_state(state.depth_stencil_state);
        self.set_rasterizer_state(state.rasterizer);

        log::trace!("graphics pipeline changed to {:?}", state.id);
        self.graphics_pipeline = Some(state);
    }

    pub fn set_compute_shader(&mut self, shader: Arc<Shader>) {
        debug_assert_eq!(shader.stage, ShaderStage::Compute);
        let changed = self
            .compute_shader
            .as_ref()
            .map_or(true, |current| current.id != shader.id);
        if !changed {
            return;
        }

        self.pipeline_bits |= PipelineFlags::COMPUTE_SHADER;
        self.using_tessellation = false;

        log::trace!("compute shader changed to {:?}", shader.id);
        self.compute_shader = Some(shader);
    }

    // --- Render targets --------------------------------------------------

    /// See [`RenderPassState::set_render_targets`]. When this returns
    /// `Ok(true)` the caller tears down the encoder and, once a new one
    /// exists, calls [`Self::set_state_dirty`].
    pub fn set_render_targets(
        &mut self,
        info: RenderTargetsInfo,
    ) -> Result<bool, RenderTargetError> {
        self.pass.set_render_targets(info)
    }

    pub fn needs_to_set_render_target(&mut self, info: &RenderTargetsInfo) -> bool {
        self.pass.needs_to_set_render_target(info)
    }

    pub fn prepare_to_restart(&mut self) -> bool {
        self.pass.prepare_to_restart()
    }

    pub fn invalidate_render_targets(&mut self) {
        self.pass.invalidate_render_targets();
    }

    pub fn discard_render_targets(&mut self, depth: bool, stencil: bool, color_bit_mask: u32) {
        self.pass.discard_render_targets(depth, stencil, color_bit_mask);
    }

    pub fn flush_store_actions(&mut self, sink: &mut impl CommandSink, conditional_switch: bool) {
        self.pass.flush_store_actions(sink, conditional_switch);
    }

    // --- Dirty management ------------------------------------------------

    /// Forces a full re-flush of everything tracked. Called after the
    /// native encoder is torn down and restarted, when none of the
    /// previously emitted state survives.
    pub fn set_state_dirty(&mut self) {
        self.raster_bits = RasterFlags::all();
        self.pipeline_bits = PipelineFlags::all();
        for set in self.stages.iter_mut() {
            set.mark_all_pending();
        }
    }

    /// The full frame-boundary reset.
    pub fn reset(&mut self) {
        self.index_type = IndexType::None;
        self.viewport = Viewport::default();
        self.scissor = ScissorRect::default();
        self.scissor_enabled = false;
        for set in self.stages.iter_mut() {
            set.reset();
        }
        self.rasterizer = None;
        self.depth_stencil_state = None;
        self.stencil_ref = 0;
        self.blend_color = Color::TRANSPARENT;
        self.graphics_pipeline = None;
        self.compute_shader = None;
        self.using_tessellation = false;
        self.render_pipeline = None;
        self.compute_pipeline = None;
        self.pass.reset();
        self.raster_bits = RasterFlags::all();
        self.pipeline_bits = PipelineFlags::all();
    }

    // --- Flush -----------------------------------------------------------

    /// Emits the raster-dirty subset of state and clears the raster
    /// mask.
    pub fn set_render_state(&mut self, sink: &mut impl CommandSink) {
        if self.raster_bits.is_empty() {
            return;
        }
        profiling::scope!("StateCache::set_render_state");

        if self.raster_bits.contains(RasterFlags::VIEWPORT) {
            sink.set_viewport(self.viewport);
        }
        if self.raster_bits.contains(RasterFlags::FRONT_FACING_WINDING) {
            sink.set_front_facing_winding(Winding::CounterClockwise);
        }
        if self.raster_bits.contains(RasterFlags::CULL_MODE) {
            let rasterizer = self
                .rasterizer
                .expect("rasterizer state must be bound before a flush");
            sink.set_cull_mode(rasterizer.cull_mode);
        }
        if self.raster_bits.contains(RasterFlags::DEPTH_BIAS) {
            let rasterizer = self
                .rasterizer
                .expect("rasterizer state must be bound before a flush");
            sink.set_depth_bias(
                rasterizer.depth_bias,
                rasterizer.slope_scale_depth_bias,
                f32::MAX,
            );
        }
        if self.raster_bits.contains(RasterFlags::SCISSOR_RECT) {
            sink.set_scissor_rect(self.scissor);
        }
        if self.raster_bits.contains(RasterFlags::FILL_MODE) {
            let rasterizer = self
                .rasterizer
                .expect("rasterizer state must be bound before a flush");
            sink.set_fill_mode(rasterizer.fill_mode);
        }
        if self.raster_bits.contains(RasterFlags::BLEND_COLOR) {
            sink.set_blend_color(self.blend_color);
        }
        if self.raster_bits.contains(RasterFlags::DEPTH_STENCIL_STATE) {
            sink.set_depth_stencil_state(self.depth_stencil_state);
        }
        if self.raster_bits.contains(RasterFlags::STENCIL_REFERENCE) {
            sink.set_stencil_reference(self.stencil_ref);
        }

        self.raster_bits = RasterFlags::empty();
    }

    /// Resolves and emits the graphics pipeline if any pipeline bit is
    /// dirty. A pipeline-object change forces all three stage format
    /// hashes to be recomputed; otherwise only the flagged stages are.
    pub fn set_render_pipeline_state(
        &mut self,
        sink: &mut impl CommandSink,
        cache: &PipelineCache,
    ) {
        if !self.pipeline_bits.intersects(PipelineFlags::RASTER_MASK) {
            return;
        }
        profiling::scope!("StateCache::set_render_pipeline_state");

        if self.pipeline_bits.contains(PipelineFlags::PIPELINE_STATE) {
            self.pipeline_bits |= PipelineFlags::VERTEX_BUFFER_FORMATS
                | PipelineFlags::PIXEL_BUFFER_FORMATS
                | PipelineFlags::DOMAIN_BUFFER_FORMATS;
        }

        let state = Arc::clone(
            self.graphics_pipeline
                .as_ref()
                .expect("a graphics pipeline must be bound before a draw flush"),
        );

        if self.pipeline_bits.contains(PipelineFlags::VERTEX_BUFFER_FORMATS) {
            let buffers = &mut self.stages[ShaderStage::Vertex.index()].buffers;
            buffers.format_hash = state.vertex.bindings.binding_hash(buffers.formats());
        }
        if self.pipeline_bits.contains(PipelineFlags::PIXEL_BUFFER_FORMATS) {
            let buffers = &mut self.stages[ShaderStage::Pixel.index()].buffers;
            buffers.format_hash = match state.pixel {
                Some(ref pixel) => pixel.bindings.binding_hash(buffers.formats()),
                None => 0,
            };
        }
        if self.pipeline_bits.contains(PipelineFlags::DOMAIN_BUFFER_FORMATS) {
            let buffers = &mut self.stages[ShaderStage::Domain.index()].buffers;
            buffers.format_hash = match state.domain {
                Some(ref domain) => domain.bindings.binding_hash(buffers.formats()),
                None => 0,
            };
        }

        let vertex_formats = *self.stages[ShaderStage::Vertex.index()].buffers.formats();
        let pixel_formats = *self.stages[ShaderStage::Pixel.index()].buffers.formats();
        let domain_formats = *self.stages[ShaderStage::Domain.index()].buffers.formats();

        let pipeline = cache.get_render_pipeline(
            &state,
            self.index_type,
            self.stages[ShaderStage::Vertex.index()].buffers.format_hash,
            self.stages[ShaderStage::Pixel.index()].buffers.format_hash,
            self.stages[ShaderStage::Domain.index()].buffers.format_hash,
            &vertex_formats,
            state.pixel.as_ref().map(|_| &pixel_formats),
            state.domain.as_ref().map(|_| &domain_formats),
        );
        sink.set_render_pipeline(&pipeline);
        self.render_pipeline = Some(pipeline);

        self.pipeline_bits &= PipelineFlags::COMPUTE_MASK;
    }

    /// Compute analogue of [`Self::set_render_pipeline_state`].
    pub fn set_compute_pipeline_state(
        &mut self,
        sink: &mut impl CommandSink,
        cache: &PipelineCache,
    ) {
        if !self.pipeline_bits.intersects(PipelineFlags::COMPUTE_MASK) {
            return;
        }
        profiling::scope!("StateCache::set_compute_pipeline_state");

        if self.pipeline_bits.contains(PipelineFlags::COMPUTE_SHADER) {
            self.pipeline_bits |= PipelineFlags::COMPUTE_BUFFER_FORMATS;
        }

        let shader = Arc::clone(
            self.compute_shader
                .as_ref()
                .expect("a compute shader must be bound before a dispatch flush"),
        );

        if self.pipeline_bits.contains(PipelineFlags::COMPUTE_BUFFER_FORMATS) {
            let buffers = &mut self.stages[ShaderStage::Compute.index()].buffers;
            buffers.format_hash = shader.bindings.binding_hash(buffers.formats());
        }

        let formats = *self.stages[ShaderStage::Compute.index()].buffers.formats();
        let pipeline = cache.get_compute_pipeline(
            &shader,
            self.stages[ShaderStage::Compute.index()].buffers.format_hash,
            &formats,
        );
        sink.set_compute_pipeline(&pipeline);
        self.compute_pipeline = Some(pipeline);

        self.pipeline_bits &= PipelineFlags::RASTER_MASK;
    }

    /// Emits the pending subset of one stage's binding table. Slots that
    /// were touched but are unoccupied are skipped; occupancy is left
    /// intact for the validator to query.
    pub fn commit_resource_table(&mut self, stage: ShaderStage, sink: &mut impl CommandSink) {
        profiling::scope!("StateCache::commit_resource_table");
        let set = &mut self.stages[stage.index()];

        let pending = set.buffers.take_pending();
        for index in mask_indices_u64(pending as u64) {
            let (slot, format) = set.buffers.slot(index);
            if let Some(buffer) = slot.buffer {
                sink.set_shader_buffer(stage, buffer, slot.offset, slot.length, index as u32, format);
            } else if let Some(bytes) = slot.bytes {
                sink.set_shader_bytes(stage, bytes, slot.offset, index as u32);
            }
        }

        let pending = set.textures.take_pending();
        for index in mask_indices(pending) {
            if let Some(binding) = set.textures.get(index) {
                sink.set_shader_texture(stage, binding.texture, index as u32);
            }
        }

        let pending = set.samplers.take_pending();
        for index in mask_indices_u64(pending as u64) {
            if let Some(sampler) = set.samplers.get(index) {
                sink.set_shader_sampler(stage, sampler, index as u32);
            }
        }
    }

    // --- Validation ------------------------------------------------------

    /// Cross-checks the bound resources of the graphics stages against
    /// the active pipeline's reflection before a draw. Failures are
    /// logged and reported, never fatal.
    pub fn validate_draw(&self, level: DebugLevel) -> bool {
        let state = match self.graphics_pipeline {
            Some(ref state) => state,
            None => {
                debug_assert!(false, "validate_draw without a graphics pipeline");
                return false;
            }
        };
        let mut ok = validate_stage(
            level,
            &self.stages[ShaderStage::Vertex.index()],
            &state.vertex,
        );
        if let Some(ref pixel) = state.pixel {
            ok &= validate_stage(level, &self.stages[ShaderStage::Pixel.index()], pixel);
        }
        ok
    }

    /// Compute analogue of [`Self::validate_draw`].
    pub fn validate_dispatch(&self, level: DebugLevel) -> bool {
        let shader = match self.compute_shader {
            Some(ref shader) => shader,
            None => {
                debug_assert!(false, "validate_dispatch without a compute shader");
                return false;
            }
        };
        validate_stage(level, &self.stages[ShaderStage::Compute.index()], shader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ShaderBindings;
    use crate::resource::{PipelineStateId, ShaderId, TextureId};
    use kt::TextureViewDimension;

    #[derive(Debug, PartialEq)]
    enum Emitted {
        Viewport,
        Winding,
        CullMode,
        DepthBias,
        Scissor(ScissorRect),
        FillMode,
        BlendColor,
        DepthStencil,
        StencilRef(u32),
        RenderPipeline,
        ComputePipeline,
        Buffer(ShaderStage, u32),
        Bytes(ShaderStage, u32),
        Texture(ShaderStage, u32),
        Sampler(ShaderStage, u32),
        StoreActions,
    }

    #[derive(Default)]
    struct Recorder {
        emitted: Vec<Emitted>,
    }

    impl CommandSink for Recorder {
        fn set_viewport(&mut self, _: Viewport) {
            self.emitted.push(Emitted::Viewport);
        }
        fn set_front_facing_winding(&mut self, _: Winding) {
            self.emitted.push(Emitted::Winding);
        }
        fn set_cull_mode(&mut self, _: kt::CullMode) {
            self.emitted.push(Emitted::CullMode);
        }
        fn set_fill_mode(&mut self, _: kt::FillMode) {
            self.emitted.push(Emitted::FillMode);
        }
        fn set_depth_bias(&mut self, _: f32, _: f32, _: f32) {
            self.emitted.push(Emitted::DepthBias);
        }
        fn set_scissor_rect(&mut self, rect: ScissorRect) {
            self.emitted.push(Emitted::Scissor(rect));
        }
        fn set_blend_color(&mut self, _: Color) {
            self.emitted.push(Emitted::BlendColor);
        }
        fn set_depth_stencil_state(&mut self, _: Option<DepthStencilStateId>) {
            self.emitted.push(Emitted::DepthStencil);
        }
        fn set_stencil_reference(&mut self, reference: u32) {
            self.emitted.push(Emitted::StencilRef(reference));
        }
        fn set_render_pipeline(&mut self, _: &Arc<CompiledPipeline>) {
            self.emitted.push(Emitted::RenderPipeline);
        }
        fn set_compute_pipeline(&mut self, _: &Arc<CompiledPipeline>) {
            self.emitted.push(Emitted::ComputePipeline);
        }
        fn set_shader_buffer(
            &mut self,
            stage: ShaderStage,
            _: BufferId,
            _: u64,
            _: u64,
            index: u32,
            _: PixelFormat,
        ) {
            self.emitted.push(Emitted::Buffer(stage, index));
        }
        fn set_shader_bytes(&mut self, stage: ShaderStage, _: BytesId, _: u64, index: u32) {
            self.emitted.push(Emitted::Bytes(stage, index));
        }
        fn set_shader_texture(&mut self, stage: ShaderStage, _: TextureId, index: u32) {
            self.emitted.push(Emitted::Texture(stage, index));
        }
        fn set_shader_sampler(&mut self, stage: ShaderStage, _: SamplerId, index: u32) {
            self.emitted.push(Emitted::Sampler(stage, index));
        }
        fn set_store_actions(
            &mut self,
            _: &[kt::ResolvedStoreAction],
            _: kt::ResolvedStoreAction,
            _: kt::ResolvedStoreAction,
        ) {
            self.emitted.push(Emitted::StoreActions);
        }
    }

    fn cache() -> StateCache {
        StateCache::new(DeviceFeatures::empty(), Limits::default())
    }

    fn shader(raw: u64, stage: ShaderStage, typed_buffers: u32) -> Arc<Shader> {
        Arc::new(Shader {
            id: ShaderId::new(raw).unwrap(),
            stage,
            label: format!("shader-{}", raw),
            bindings: ShaderBindings::from_arguments(Vec::new(), typed_buffers),
        })
    }

    fn pipeline(raw: u64, typed_buffers: u32) -> Arc<GraphicsPipelineState> {
        Arc::new(GraphicsPipelineState {
            id: PipelineStateId::new(raw).unwrap(),
            vertex: shader(raw * 10 + 1, ShaderStage::Vertex, typed_buffers),
            hull: None,
            domain: None,
            pixel: Some(shader(raw * 10 + 2, ShaderStage::Pixel, 0)),
            depth_stencil_state: None,
            rasterizer: RasterizerState::default(),
        })
    }

    #[test]
    fn redundant_setters_mark_nothing_dirty() {
        let mut state = cache();
        state.set_shader_buffer(
            ShaderStage::Vertex,
            BufferId::new(1),
            None,
            0,
            256,
            2,
            PixelFormat::R32Float,
        );
        assert!(state.pipeline_bits().contains(PipelineFlags::VERTEX_BUFFER_FORMATS));

        // Flush away the dirty state.
        let mut sink = Recorder::default();
        state.set_graphics_pipeline(pipeline(1, 0));
        let pipelines = PipelineCache::new();
        state.set_render_pipeline_state(&mut sink, &pipelines);
        state.commit_resource_table(ShaderStage::Vertex, &mut sink);
        assert!(!state.pipeline_bits().intersects(PipelineFlags::RASTER_MASK));

        // The identical rebind leaves everything clean.
        state.set_shader_buffer(
            ShaderStage::Vertex,
            BufferId::new(1),
            None,
            0,
            256,
            2,
            PixelFormat::R32Float,
        );
        assert!(!state.pipeline_bits().intersects(PipelineFlags::RASTER_MASK));
        let mut sink = Recorder::default();
        state.commit_resource_table(ShaderStage::Vertex, &mut sink);
        assert!(sink.emitted.is_empty());
    }

    #[test]
    fn buffer_identity_change_does_not_touch_format_hash_bit() {
        let mut state = cache();
        state.set_shader_buffer(
            ShaderStage::Pixel,
            BufferId::new(1),
            None,
            0,
            64,
            0,
            PixelFormat::R32Float,
        );
        state.pipeline_bits.remove(PipelineFlags::PIXEL_BUFFER_FORMATS);

        state.set_shader_buffer(
            ShaderStage::Pixel,
            BufferId::new(2),
            None,
            0,
            64,
            0,
            PixelFormat::R32Float,
        );
        assert!(!state.pipeline_bits().contains(PipelineFlags::PIXEL_BUFFER_FORMATS));

        state.set_shader_buffer(
            ShaderStage::Pixel,
            BufferId::new(2),
            None,
            0,
            64,
            0,
            PixelFormat::R32Uint,
        );
        assert!(state.pipeline_bits().contains(PipelineFlags::PIXEL_BUFFER_FORMATS));
    }

    #[test]
    fn hull_format_changes_never_dirty_the_pipeline() {
        let mut state = cache();
        state.set_shader_buffer(
            ShaderStage::Hull,
            BufferId::new(1),
            None,
            0,
            64,
            0,
            PixelFormat::R32Float,
        );
        assert!(!state.pipeline_bits().intersects(PipelineFlags::RASTER_MASK));
    }

    #[test]
    fn commit_emits_only_dirty_slots_and_preserves_occupancy() {
        let mut state = cache();
        for &index in &[0u32, 3, 67] {
            state.set_shader_texture(
                ShaderStage::Pixel,
                Some(TextureBinding {
                    texture: TextureId::new(u64::from(index) + 1).unwrap(),
                    dimension: TextureViewDimension::D2,
                }),
                index,
            );
        }

        let mut sink = Recorder::default();
        state.commit_resource_table(ShaderStage::Pixel, &mut sink);
        assert_eq!(
            sink.emitted,
            vec![
                Emitted::Texture(ShaderStage::Pixel, 0),
                Emitted::Texture(ShaderStage::Pixel, 3),
                Emitted::Texture(ShaderStage::Pixel, 67),
            ]
        );

        // Occupancy survives the commit; only the pending set drains.
        let bindings = state.stage_bindings(ShaderStage::Pixel);
        let bound: Vec<usize> = crate::binding::mask_indices(bindings.textures.bound_mask()).collect();
        assert_eq!(bound, vec![0, 3, 67]);

        let mut sink = Recorder::default();
        state.commit_resource_table(ShaderStage::Pixel, &mut sink);
        assert!(sink.emitted.is_empty());
    }

    #[test]
    fn set_state_dirty_reemits_everything_bound() {
        let mut state = cache();
        state.set_shader_buffer(
            ShaderStage::Vertex,
            BufferId::new(1),
            None,
            0,
            16,
            0,
            PixelFormat::Unknown,
        );
        state.set_shader_sampler(ShaderStage::Vertex, SamplerId::new(2), 1);
        let mut sink = Recorder::default();
        state.commit_resource_table(ShaderStage::Vertex, &mut sink);
        assert_eq!(sink.emitted.len(), 2);

        state.set_state_dirty();
        let mut sink = Recorder::default();
        state.commit_resource_table(ShaderStage::Vertex, &mut sink);
        // Everything bound is re-emitted; untouched empty slots are not.
        assert_eq!(
            sink.emitted,
            vec![
                Emitted::Buffer(ShaderStage::Vertex, 0),
                Emitted::Sampler(ShaderStage::Vertex, 1),
            ]
        );
    }

    #[test]
    fn raster_flush_emits_dirty_bits_once() {
        let mut state = cache();
        state.set_rasterizer_state(RasterizerState::default());
        state.set_stencil_ref(7);

        let mut sink = Recorder::default();
        state.set_render_state(&mut sink);
        assert!(sink.emitted.contains(&Emitted::CullMode));
        assert!(sink.emitted.contains(&Emitted::StencilRef(7)));
        assert!(!sink.emitted.contains(&Emitted::Viewport));

        let mut sink = Recorder::default();
        state.set_render_state(&mut sink);
        assert!(sink.emitted.is_empty());
    }

    #[test]
    fn pipeline_flush_consumes_raster_bits_only() {
        let mut state = cache();
        state.set_graphics_pipeline(pipeline(1, 0));
        state.set_compute_shader(shader(50, ShaderStage::Compute, 0));

        let pipelines = PipelineCache::new();
        let mut sink = Recorder::default();
        state.set_render_pipeline_state(&mut sink, &pipelines);
        assert_eq!(sink.emitted, vec![Emitted::RenderPipeline]);
        assert!(state.pipeline_bits().intersects(PipelineFlags::COMPUTE_MASK));

        let mut sink = Recorder::default();
        state.set_compute_pipeline_state(&mut sink, &pipelines);
        assert_eq!(sink.emitted, vec![Emitted::ComputePipeline]);
        assert!(state.pipeline_bits().is_empty());
    }

    #[test]
    fn same_format_hash_reuses_the_compiled_pipeline() {
        let mut state = cache();
        state.set_graphics_pipeline(pipeline(1, 0b1));
        state.set_shader_buffer(
            ShaderStage::Vertex,
            BufferId::new(1),
            None,
            0,
            64,
            0,
            PixelFormat::R32Float,
        );

        let pipelines = PipelineCache::new();
        let mut sink = Recorder::default();
        state.set_render_pipeline_state(&mut sink, &pipelines);
        let first = Arc::clone(state.render_pipeline().unwrap());

        // A different buffer with the same format must hit the same
        // compiled pipeline.
        state.set_shader_buffer(
            ShaderStage::Vertex,
            BufferId::new(9),
            None,
            0,
            64,
            0,
            PixelFormat::R32Float,
        );
        state.set_index_type(IndexType::None);
        state.set_state_dirty();
        state.set_render_pipeline_state(&mut sink, &pipelines);
        assert!(Arc::ptr_eq(&first, state.render_pipeline().unwrap()));
        assert_eq!(pipelines.render_pipeline_count(), 1);

        // A format change produces a different specialization.
        state.set_shader_buffer(
            ShaderStage::Vertex,
            BufferId::new(9),
            None,
            0,
            64,
            0,
            PixelFormat::R32Uint,
        );
        state.set_render_pipeline_state(&mut sink, &pipelines);
        assert!(!Arc::ptr_eq(&first, state.render_pipeline().unwrap()));
        assert_eq!(pipelines.render_pipeline_count(), 2);
    }

    #[test]
    fn tessellation_toggle_clears_hull_bindings() {
        let mut state = cache();
        state.set_shader_texture(
            ShaderStage::Hull,
            Some(TextureBinding {
                texture: TextureId::new(3).unwrap(),
                dimension: TextureViewDimension::D2,
            }),
            4,
        );
        assert!(state.stage_bindings(ShaderStage::Hull).textures.is_bound(4));

        let tessellated = Arc::new(GraphicsPipelineState {
            id: PipelineStateId::new(2).unwrap(),
            vertex: shader(21, ShaderStage::Vertex, 0),
            hull: Some(shader(22, ShaderStage::Hull, 0)),
            domain: Some(shader(23, ShaderStage::Domain, 0)),
            pixel: Some(shader(24, ShaderStage::Pixel, 0)),
            depth_stencil_state: None,
            rasterizer: RasterizerState::default(),
        });
        state.set_graphics_pipeline(tessellated);
        assert!(!state.stage_bindings(ShaderStage::Hull).textures.is_bound(4));
    }

    #[test]
    fn scissor_is_clamped_to_the_framebuffer() {
        use crate::render_pass::{ColorTargetView, RenderTargetsInfo};
        use crate::resource::TextureInfo;
        use kt::{LoadAction, StoreAction};

        let mut state = cache();
        let mut info = RenderTargetsInfo::default();
        info.colors.push(Some(ColorTargetView {
            texture: Arc::new(TextureInfo::new_2d(
                TextureId::new(1).unwrap(),
                PixelFormat::Rgba8Unorm,
                640,
                480,
            )),
            mip: 0,
            array_slice: Some(0),
            load: LoadAction::Clear,
            store: StoreAction::Store,
        }));
        state.set_render_targets(info).unwrap();

        state.set_scissor_rect(
            true,
            ScissorRect {
                x: 600,
                y: 400,
                width: 200,
                height: 200,
            },
        );
        let mut sink = Recorder::default();
        state.set_render_state(&mut sink);
        assert!(sink.emitted.contains(&Emitted::Scissor(ScissorRect {
            x: 600,
            y: 400,
            width: 40,
            height: 80,
        })));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_buffer_index_is_fatal() {
        let mut state = cache();
        state.set_shader_buffer(
            ShaderStage::Vertex,
            BufferId::new(1),
            None,
            0,
            16,
            kt::MAX_BUFFERS as u32,
            PixelFormat::Unknown,
        );
    }
}
