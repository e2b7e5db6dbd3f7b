//! The seam between the state cache and a native command encoder.
//!
//! The flush half of the state cache emits into a [`CommandSink`], which a
//! backend implements over its native encoder object. The set of methods
//! is closed and resolved at compile time per target; there is no dynamic
//! backend discovery here.

use crate::pipeline::CompiledPipeline;
use crate::resource::{BufferId, BytesId, DepthStencilStateId, SamplerId, TextureId};
use std::sync::Arc;

/// Receiver of the native state commands the cache decides to emit.
///
/// Every call corresponds to exactly one native encoder command; the
/// cache guarantees it only issues calls for state that actually changed
/// since the last flush.
pub trait CommandSink {
    fn set_viewport(&mut self, viewport: kt::Viewport);
    fn set_front_facing_winding(&mut self, winding: kt::Winding);
    fn set_cull_mode(&mut self, mode: kt::CullMode);
    fn set_fill_mode(&mut self, mode: kt::FillMode);
    fn set_depth_bias(&mut self, bias: f32, slope_scale: f32, clamp: f32);
    fn set_scissor_rect(&mut self, rect: kt::ScissorRect);
    fn set_blend_color(&mut self, color: kt::Color);
    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilStateId>);
    fn set_stencil_reference(&mut self, reference: u32);

    fn set_render_pipeline(&mut self, pipeline: &Arc<CompiledPipeline>);
    fn set_compute_pipeline(&mut self, pipeline: &Arc<CompiledPipeline>);

    fn set_shader_buffer(
        &mut self,
        stage: kt::ShaderStage,
        buffer: BufferId,
        offset: u64,
        length: u64,
        index: u32,
        format: kt::PixelFormat,
    );
    fn set_shader_bytes(&mut self, stage: kt::ShaderStage, bytes: BytesId, offset: u64, index: u32);
    fn set_shader_texture(&mut self, stage: kt::ShaderStage, texture: TextureId, index: u32);
    fn set_shader_sampler(&mut self, stage: kt::ShaderStage, sampler: SamplerId, index: u32);

    /// Supplies the end-of-pass store actions when the pass was encoded
    /// with deferred store actions.
    fn set_store_actions(
        &mut self,
        colors: &[kt::ResolvedStoreAction],
        depth: kt::ResolvedStoreAction,
        stencil: kt::ResolvedStoreAction,
    );
}

/// A sink that swallows everything. Useful headless and in tests that
/// only care about the tracking side.
#[derive(Debug, Default)]
pub struct NoopSink;

impl CommandSink for NoopSink {
    fn set_viewport(&mut self, _viewport: kt::Viewport) {}
    fn set_front_facing_winding(&mut self, _winding: kt::Winding) {}
    fn set_cull_mode(&mut self, _mode: kt::CullMode) {}
    fn set_fill_mode(&mut self, _mode: kt::FillMode) {}
    fn set_depth_bias(&mut self, _bias: f32, _slope_scale: f32, _clamp: f32) {}
    fn set_scissor_rect(&mut self, _rect: kt::ScissorRect) {}
    fn set_blend_color(&mut self, _color: kt::Color) {}
    fn set_depth_stencil_state(&mut self, _state: Option<DepthStencilStateId>) {}
    fn set_stencil_reference(&mut self, _reference: u32) {}
    fn set_render_pipeline(&mut self, _pipeline: &Arc<CompiledPipeline>) {}
    fn set_compute_pipeline(&mut self, _pipeline: &Arc<CompiledPipeline>) {}
    fn set_shader_buffer(
        &mut self,
        _stage: kt::ShaderStage,
        _buffer: BufferId,
        _offset: u64,
        _length: u64,
        _index: u32,
        _format: kt::PixelFormat,
    ) {
    }
    fn set_shader_bytes(
        &mut self,
        _stage: kt::ShaderStage,
        _bytes: BytesId,
        _offset: u64,
        _index: u32,
    ) {
    }
    fn set_shader_texture(&mut self, _stage: kt::ShaderStage, _texture: TextureId, _index: u32) {}
    fn set_shader_sampler(&mut self, _stage: kt::ShaderStage, _sampler: SamplerId, _index: u32) {}
    fn set_store_actions(
        &mut self,
        _colors: &[kt::ResolvedStoreAction],
        _depth: kt::ResolvedStoreAction,
        _stencil: kt::ResolvedStoreAction,
    ) {
    }
}
