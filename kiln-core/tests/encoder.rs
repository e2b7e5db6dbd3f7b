//! End-to-end exercise of the state cache against a recording sink:
//! bind resources across the texture-mask word boundary, flush, draw,
//! validate, and confirm that redundant work never reaches the encoder.

use kiln_core::binding::{mask_indices, TextureBinding};
use kiln_core::encoder::{CommandSink, NoopSink};
use kiln_core::pipeline::{
    CompiledPipeline, GraphicsPipelineState, PipelineCache, Shader, ShaderArgument, ShaderBindings,
};
use kiln_core::render_pass::{ColorTargetView, RenderTargetsInfo};
use kiln_core::resource::{
    BufferId, BytesId, DepthStencilStateId, PipelineStateId, SamplerId, ShaderId, TextureId,
    TextureInfo,
};
use kiln_core::state::StateCache;
use kt::{
    Color, DebugLevel, DeviceFeatures, IndexType, Limits, LoadAction, PixelFormat,
    RasterizerState, ResolvedStoreAction, ScissorRect, ShaderStage, StoreAction,
    TextureViewDimension, Viewport, Winding,
};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
enum Command {
    Viewport,
    Pipeline,
    Buffer(ShaderStage, u32),
    Texture(ShaderStage, u32),
    Sampler(ShaderStage, u32),
    Other,
}

#[derive(Default)]
struct RecordingSink {
    commands: Vec<Command>,
}

impl RecordingSink {
    fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}

impl CommandSink for RecordingSink {
    fn set_viewport(&mut self, _: Viewport) {
        self.commands.push(Command::Viewport);
    }
    fn set_front_facing_winding(&mut self, _: Winding) {
        self.commands.push(Command::Other);
    }
    fn set_cull_mode(&mut self, _: kt::CullMode) {
        self.commands.push(Command::Other);
    }
    fn set_fill_mode(&mut self, _: kt::FillMode) {
        self.commands.push(Command::Other);
    }
    fn set_depth_bias(&mut self, _: f32, _: f32, _: f32) {
        self.commands.push(Command::Other);
    }
    fn set_scissor_rect(&mut self, _: ScissorRect) {
        self.commands.push(Command::Other);
    }
    fn set_blend_color(&mut self, _: Color) {
        self.commands.push(Command::Other);
    }
    fn set_depth_stencil_state(&mut self, _: Option<DepthStencilStateId>) {
        self.commands.push(Command::Other);
    }
    fn set_stencil_reference(&mut self, _: u32) {
        self.commands.push(Command::Other);
    }
    fn set_render_pipeline(&mut self, _: &Arc<CompiledPipeline>) {
        self.commands.push(Command::Pipeline);
    }
    fn set_compute_pipeline(&mut self, _: &Arc<CompiledPipeline>) {
        self.commands.push(Command::Pipeline);
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
        self.commands.push(Command::Buffer(stage, index));
    }
    fn set_shader_bytes(&mut self, stage: ShaderStage, _: BytesId, _: u64, index: u32) {
        self.commands.push(Command::Buffer(stage, index));
    }
    fn set_shader_texture(&mut self, stage: ShaderStage, _: TextureId, index: u32) {
        self.commands.push(Command::Texture(stage, index));
    }
    fn set_shader_sampler(&mut self, stage: ShaderStage, _: SamplerId, index: u32) {
        self.commands.push(Command::Sampler(stage, index));
    }
    fn set_store_actions(
        &mut self,
        _: &[ResolvedStoreAction],
        _: ResolvedStoreAction,
        _: ResolvedStoreAction,
    ) {
        self.commands.push(Command::Other);
    }
}

fn pixel_shader() -> Arc<Shader> {
    let arguments = vec![
        ShaderArgument::Buffer {
            index: 0,
            name: "view_uniforms".to_string(),
        },
        ShaderArgument::Texture {
            index: 0,
            dimension: TextureViewDimension::D2,
            name: "scene_color".to_string(),
        },
        ShaderArgument::Texture {
            index: 3,
            dimension: TextureViewDimension::D2,
            name: "gbuffer_a".to_string(),
        },
        ShaderArgument::Texture {
            index: 67,
            dimension: TextureViewDimension::D2,
            name: "bindless_overflow".to_string(),
        },
        ShaderArgument::Sampler {
            index: 0,
            name: "scene_color_sampler".to_string(),
        },
    ];
    Arc::new(Shader {
        id: ShaderId::new(2).unwrap(),
        stage: ShaderStage::Pixel,
        label: "deferred_lighting_ps".to_string(),
        bindings: ShaderBindings::from_arguments(arguments, 0),
    })
}

fn vertex_shader() -> Arc<Shader> {
    let arguments = vec![ShaderArgument::Buffer {
        index: 0,
        name: "vertex_stream".to_string(),
    }];
    Arc::new(Shader {
        id: ShaderId::new(1).unwrap(),
        stage: ShaderStage::Vertex,
        label: "fullscreen_vs".to_string(),
        bindings: ShaderBindings::from_arguments(arguments, 0),
    })
}

fn test_pipeline() -> Arc<GraphicsPipelineState> {
    Arc::new(GraphicsPipelineState {
        id: PipelineStateId::new(1).unwrap(),
        vertex: vertex_shader(),
        hull: None,
        domain: None,
        pixel: Some(pixel_shader()),
        depth_stencil_state: None,
        rasterizer: RasterizerState::default(),
    })
}

fn texture_at(raw: u64) -> Option<TextureBinding> {
    Some(TextureBinding {
        texture: TextureId::new(raw).unwrap(),
        dimension: TextureViewDimension::D2,
    })
}

fn bind_everything(state: &mut StateCache) {
    state.set_shader_buffer(
        ShaderStage::Vertex,
        BufferId::new(10),
        None,
        0,
        1 << 16,
        0,
        PixelFormat::Unknown,
    );
    state.set_shader_buffer(
        ShaderStage::Pixel,
        BufferId::new(11),
        None,
        0,
        256,
        0,
        PixelFormat::Unknown,
    );
    for &slot in &[0u32, 3, 67] {
        state.set_shader_texture(ShaderStage::Pixel, texture_at(u64::from(slot) + 20), slot);
    }
    state.set_shader_sampler(ShaderStage::Pixel, SamplerId::new(30), 0);
}

#[test]
fn full_draw_flush_round_trip() {
    let mut state = StateCache::new(DeviceFeatures::empty(), Limits::default());
    let pipelines = PipelineCache::new();
    let mut sink = RecordingSink::default();

    // Start a pass.
    let mut targets = RenderTargetsInfo::default();
    targets.colors.push(Some(ColorTargetView {
        texture: Arc::new(TextureInfo::new_2d(
            TextureId::new(1).unwrap(),
            PixelFormat::Rgba16Float,
            1920,
            1080,
        )),
        mip: 0,
        array_slice: Some(0),
        load: LoadAction::Clear,
        store: StoreAction::Store,
    }));
    assert!(state.set_render_targets(targets).unwrap());
    state.set_state_dirty();

    state.set_graphics_pipeline(test_pipeline());
    state.set_index_type(IndexType::U16);
    bind_everything(&mut state);

    // The occupancy mask reports exactly the bound texture slots, with
    // nothing invented at the 64-bit seam.
    let bound: Vec<usize> = mask_indices(
        state
            .stage_bindings(ShaderStage::Pixel)
            .textures
            .bound_mask(),
    )
    .collect();
    assert_eq!(bound, vec![0, 3, 67]);

    // Everything required is bound, so the draw validates.
    assert!(state.validate_draw(DebugLevel::Validation));

    // Flush.
    state.set_viewport(Viewport {
        x: 0.0,
        y: 0.0,
        width: 1920.0,
        height: 1080.0,
        min_depth: 0.0,
        max_depth: 1.0,
    });
    state.set_render_state(&mut sink);
    state.set_render_pipeline_state(&mut sink, &pipelines);
    state.commit_resource_table(ShaderStage::Vertex, &mut sink);
    state.commit_resource_table(ShaderStage::Pixel, &mut sink);

    let commands = sink.drain();
    assert!(commands.contains(&Command::Viewport));
    assert!(commands.contains(&Command::Pipeline));
    assert!(commands.contains(&Command::Buffer(ShaderStage::Vertex, 0)));
    for &slot in &[0u32, 3, 67] {
        assert!(commands.contains(&Command::Texture(ShaderStage::Pixel, slot)));
    }
    // No duplicates out of the mask walk, and nothing at slot 64.
    assert_eq!(
        commands
            .iter()
            .filter(|command| matches!(command, Command::Texture(..)))
            .count(),
        3
    );
    assert!(!commands.contains(&Command::Texture(ShaderStage::Pixel, 64)));

    // A second draw with no state changes flushes nothing.
    state.set_render_state(&mut sink);
    state.set_render_pipeline_state(&mut sink, &pipelines);
    state.commit_resource_table(ShaderStage::Vertex, &mut sink);
    state.commit_resource_table(ShaderStage::Pixel, &mut sink);
    assert!(sink.drain().is_empty());
    assert_eq!(pipelines.render_pipeline_count(), 1);
}

#[test]
fn omitting_one_binding_fails_validation() {
    let mut state = StateCache::new(DeviceFeatures::empty(), Limits::default());
    state.set_graphics_pipeline(test_pipeline());
    bind_everything(&mut state);
    assert!(state.validate_draw(DebugLevel::Validation));

    state.set_shader_texture(ShaderStage::Pixel, None, 67);
    assert!(!state.validate_draw(DebugLevel::Validation));
    assert!(!state.validate_draw(DebugLevel::FastValidation));

    // Rebinding restores a clean validation.
    state.set_shader_texture(ShaderStage::Pixel, texture_at(87), 67);
    assert!(state.validate_draw(DebugLevel::Validation));
}

#[test]
fn headless_flush_and_dispatch_validation() {
    let mut state = StateCache::new(DeviceFeatures::empty(), Limits::default());
    let pipelines = PipelineCache::new();
    let mut sink = NoopSink;

    state.set_graphics_pipeline(test_pipeline());
    bind_everything(&mut state);
    state.set_render_state(&mut sink);
    state.set_render_pipeline_state(&mut sink, &pipelines);
    for stage in &ShaderStage::ALL {
        state.commit_resource_table(*stage, &mut sink);
    }
    assert!(state.raster_bits().is_empty());

    // Compute side: one required buffer, bound after the first check.
    let compute = Arc::new(Shader {
        id: ShaderId::new(40).unwrap(),
        stage: ShaderStage::Compute,
        label: "light_grid_cs".to_string(),
        bindings: ShaderBindings::from_arguments(
            vec![ShaderArgument::Buffer {
                index: 2,
                name: "light_grid".to_string(),
            }],
            0,
        ),
    });
    state.set_compute_shader(compute);
    assert!(!state.validate_dispatch(DebugLevel::FastValidation));

    state.set_shader_buffer(
        ShaderStage::Compute,
        BufferId::new(41),
        None,
        0,
        4096,
        2,
        PixelFormat::Unknown,
    );
    assert!(state.validate_dispatch(DebugLevel::FastValidation));
    state.set_compute_pipeline_state(&mut sink, &pipelines);
    assert!(state.compute_pipeline().is_some());
}

#[test]
fn encoder_restart_replays_bound_state() {
    let mut state = StateCache::new(DeviceFeatures::empty(), Limits::default());
    let pipelines = PipelineCache::new();
    let mut sink = RecordingSink::default();

    state.set_graphics_pipeline(test_pipeline());
    bind_everything(&mut state);
    state.set_render_pipeline_state(&mut sink, &pipelines);
    state.commit_resource_table(ShaderStage::Pixel, &mut sink);
    sink.drain();

    // The encoder dies (pass break); everything must be re-emitted into
    // the replacement, and the pipeline cache must not grow.
    state.set_state_dirty();
    state.set_render_pipeline_state(&mut sink, &pipelines);
    state.commit_resource_table(ShaderStage::Pixel, &mut sink);

    let commands = sink.drain();
    assert!(commands.contains(&Command::Pipeline));
    for &slot in &[0u32, 3, 67] {
        assert!(commands.contains(&Command::Texture(ShaderStage::Pixel, slot)));
    }
    assert!(commands.contains(&Command::Sampler(ShaderStage::Pixel, 0)));
    assert_eq!(pipelines.render_pipeline_count(), 1);
}
