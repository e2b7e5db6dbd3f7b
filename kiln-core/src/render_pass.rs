//! Render-target planning and store-action resolution.
//!
//! Changing the bound render-target set is the most expensive state
//! transition there is: it usually tears down the native encoder and
//! starts a new pass, reloading every attachment. This module decides
//! when that teardown is actually necessary, what load/store action each
//! attachment gets, and whether an interrupted pass can be restarted
//! without a full store/reload round-trip.
//!
//! Attachment references are the one place the cache retains resources:
//! the active target set holds its textures alive for the duration of the
//! pass and releases them exactly once when the set changes again.

use crate::encoder::CommandSink;
use crate::resource::TextureInfo;
use arrayvec::ArrayVec;
use kt::{
    DeviceFeatures, Extent, LoadAction, ResolvedStoreAction, StoreAction, MAX_COLOR_TARGETS,
};
use std::sync::Arc;
use thiserror::Error;

/// A color attachment request.
#[derive(Clone, Debug)]
pub struct ColorTargetView {
    pub texture: Arc<TextureInfo>,
    pub mip: u32,
    /// Target array slice; `None` binds every layer for layered
    /// rendering.
    pub array_slice: Option<u32>,
    pub load: LoadAction,
    pub store: StoreAction,
}

impl ColorTargetView {
    fn same_subresource(&self, other: &ColorTargetView) -> bool {
        self.texture.id == other.texture.id
            && self.mip == other.mip
            && self.array_slice == other.array_slice
    }
}

/// A depth/stencil attachment request with independent per-aspect
/// actions.
#[derive(Clone, Debug)]
pub struct DepthStencilTargetView {
    pub texture: Arc<TextureInfo>,
    pub depth_load: LoadAction,
    pub depth_store: StoreAction,
    pub stencil_load: LoadAction,
    pub stencil_store: StoreAction,
    pub access: kt::DepthStencilAccess,
}

/// The requested render-target set for a pass.
#[derive(Clone, Debug, Default)]
pub struct RenderTargetsInfo {
    /// Requested color attachments; a `None` entry leaves that slot
    /// unbound.
    pub colors: ArrayVec<Option<ColorTargetView>, MAX_COLOR_TARGETS>,
    /// Requested depth/stencil attachment.
    pub depth_stencil: Option<DepthStencilTargetView>,
    /// Number of pass-scoped UAVs; a pass with only UAVs is still a
    /// valid pass.
    pub uav_count: u32,
}

/// One attachment as it will be programmed into the pass descriptor.
#[derive(Clone, Debug)]
pub struct AttachmentPlan {
    /// The texture actually attached (the multisampled companion when
    /// one exists).
    pub texture: Arc<TextureInfo>,
    /// Resolve destination, when the store action resolves.
    pub resolve: Option<Arc<TextureInfo>>,
    pub mip: u32,
    pub slice: u32,
    pub load: LoadAction,
    /// The programmed store action; [`ResolvedStoreAction::Deferred`]
    /// when the decision is supplied at end-of-pass instead.
    pub store: ResolvedStoreAction,
}

/// The computed plan for the active pass.
#[derive(Clone, Debug, Default)]
pub struct RenderTargetPlan {
    pub colors: [Option<AttachmentPlan>; MAX_COLOR_TARGETS],
    pub depth: Option<AttachmentPlan>,
    pub stencil: Option<AttachmentPlan>,
    pub sample_count: u32,
    pub array_length: u32,
}

/// Misconfigured render-target sets. These indicate content authored for
/// capabilities the device does not have and must be caught during
/// authoring, not in the field.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RenderTargetError {
    #[error("layered rendering is unsupported on this device")]
    LayeredRenderingUnsupported,
    #[error("all color render targets must be layered when performing multi-layered rendering")]
    MixedLayeredTargets,
}

fn resolve_store_action(features: DeviceFeatures, action: StoreAction) -> ResolvedStoreAction {
    match action {
        StoreAction::DontCare => ResolvedStoreAction::DontCare,
        StoreAction::Store => ResolvedStoreAction::Store,
        // The desktop renderers may draw into the same MSAA target in two
        // separate passes; plain MultisampleResolve would lose the first
        // pass's samples, so prefer store-and-resolve where the hardware
        // has it.
        StoreAction::MultisampleResolve => {
            if features.contains(DeviceFeatures::MSAA_STORE_AND_RESOLVE) {
                ResolvedStoreAction::StoreAndMultisampleResolve
            } else {
                ResolvedStoreAction::MultisampleResolve
            }
        }
    }
}

/// Store action for an encoder that has to end abnormally and restart:
/// a multisampled attachment must keep its samples for the restarted
/// encoder to continue from.
fn conditional_store_action(features: DeviceFeatures, multisampled: bool) -> ResolvedStoreAction {
    if multisampled {
        debug_assert!(features.contains(DeviceFeatures::MSAA_STORE_AND_RESOLVE));
        ResolvedStoreAction::StoreAndMultisampleResolve
    } else {
        ResolvedStoreAction::Store
    }
}

/// Tracks the active render-target set and its end-of-pass store state.
#[derive(Debug)]
pub struct RenderPassState {
    features: DeviceFeatures,
    info: RenderTargetsInfo,
    plan: RenderTargetPlan,
    color_store: [ResolvedStoreAction; MAX_COLOR_TARGETS],
    depth_store: ResolvedStoreAction,
    stencil_store: ResolvedStoreAction,
    sample_count: u32,
    framebuffer_size: Extent,
    render_target_active: bool,
    has_valid_render_target: bool,
    has_valid_color_target: bool,
    can_restart_render_pass: bool,
    fallback_depth_stencil: Option<Arc<TextureInfo>>,
    fallback_bound: bool,
}

impl RenderPassState {
    pub fn new(features: DeviceFeatures) -> Self {
        RenderPassState {
            features,
            info: RenderTargetsInfo::default(),
            plan: RenderTargetPlan::default(),
            color_store: [ResolvedStoreAction::DontCare; MAX_COLOR_TARGETS],
            depth_store: ResolvedStoreAction::DontCare,
            stencil_store: ResolvedStoreAction::DontCare,
            sample_count: 0,
            framebuffer_size: Extent::default(),
            render_target_active: false,
            has_valid_render_target: false,
            has_valid_color_target: false,
            can_restart_render_pass: false,
            fallback_depth_stencil: None,
            fallback_bound: false,
        }
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn framebuffer_size(&self) -> Extent {
        self.framebuffer_size
    }

    pub fn has_valid_render_target(&self) -> bool {
        self.has_valid_render_target
    }

    pub fn can_restart_render_pass(&self) -> bool {
        self.can_restart_render_pass
    }

    pub fn current_targets(&self) -> &RenderTargetsInfo {
        &self.info
    }

    pub fn plan(&self) -> &RenderTargetPlan {
        &self.plan
    }

    pub fn color_store_actions(&self) -> &[ResolvedStoreAction; MAX_COLOR_TARGETS] {
        &self.color_store
    }

    pub fn depth_store_action(&self) -> ResolvedStoreAction {
        self.depth_store
    }

    pub fn stencil_store_action(&self) -> ResolvedStoreAction {
        self.stencil_store
    }

    /// Registers the disposable depth/stencil surface used when a pass
    /// has no real one; it exempts the attachment from the restart
    /// conditions.
    pub fn set_fallback_depth_stencil(&mut self, surface: Arc<TextureInfo>) {
        self.fallback_depth_stencil = Some(surface);
    }

    /// Returns a fallback surface at least `width` by `height` pixels,
    /// recreating through `create` only when the current one is too
    /// small.
    pub fn ensure_fallback_depth_stencil(
        &mut self,
        width: u32,
        height: u32,
        create: impl FnOnce(u32, u32) -> Arc<TextureInfo>,
    ) -> Arc<TextureInfo> {
        let needs_new = match self.fallback_depth_stencil {
            Some(ref surface) => surface.width < width || surface.height < height,
            None => true,
        };
        if needs_new {
            self.fallback_depth_stencil = Some(create(width, height));
        }
        Arc::clone(self.fallback_depth_stencil.as_ref().unwrap())
    }

    fn is_fallback(&self, texture: &Arc<TextureInfo>) -> bool {
        match self.fallback_depth_stencil {
            Some(ref fallback) => fallback.id == texture.id,
            None => false,
        }
    }

    /// Adopts a new target set. Returns `Ok(true)` when a new native
    /// pass must be started, `Ok(false)` when the active pass covers the
    /// request.
    pub fn set_render_targets(
        &mut self,
        info: RenderTargetsInfo,
    ) -> Result<bool, RenderTargetError> {
        if !self.needs_to_set_render_target(&info) {
            return Ok(false);
        }
        self.replan(info)?;
        Ok(true)
    }

    /// Whether the requested set can reuse the active pass.
    ///
    /// Switching *to* a `Clear` load always forces a new pass; switching
    /// to `Load` on the same subresource never does. A pure store-action
    /// increase on depth/stencil is satisfied by rewriting the recorded
    /// store action when the device defers store actions, and forces a
    /// new pass otherwise.
    pub fn needs_to_set_render_target(&mut self, new: &RenderTargetsInfo) -> bool {
        let same_depth_texture = match (&new.depth_stencil, &self.info.depth_stencil) {
            (Some(a), Some(b)) => a.texture.id == b.texture.id,
            (None, None) => true,
            _ => false,
        };
        let mut all_checks_passed = self.has_valid_render_target
            && self.render_target_active
            && new.colors.len() == self.info.colors.len()
            && new.uav_count == self.info.uav_count
            && same_depth_texture;

        if all_checks_passed {
            for (new_view, prev_view) in new.colors.iter().zip(self.info.colors.iter()) {
                match (new_view, prev_view) {
                    (Some(new_view), Some(prev_view)) => {
                        if !new_view.same_subresource(prev_view) {
                            all_checks_passed = false;
                            break;
                        }
                        // Switching to Clear must always hit a fresh pass;
                        // switching *from* Clear must not clear again, which
                        // the subresource staying identical already covers.
                        if new_view.load == LoadAction::Clear {
                            all_checks_passed = false;
                            break;
                        }
                    }
                    (None, None) => {}
                    _ => {
                        all_checks_passed = false;
                        break;
                    }
                }
            }

            if let Some(ref ds) = new.depth_stencil {
                if ds.depth_load == LoadAction::Clear || ds.stencil_load == LoadAction::Clear {
                    all_checks_passed = false;
                }
            }

            if all_checks_passed {
                all_checks_passed = self.try_adopt_store_increase(new);
            }
        }

        // Binding nothing at all is usually end-of-frame; there is no
        // framebuffer to make from it, so report the active pass as
        // reusable.
        if new.colors.len() == 1 && new.colors[0].is_none() && new.depth_stencil.is_none() {
            all_checks_passed = true;
        }

        !all_checks_passed
    }

    /// Handles a depth/stencil store-action *increase* without breaking
    /// the encoder by rewriting the recorded store actions, when the
    /// device supports deferred store actions. Returns false when a new
    /// pass is unavoidable.
    fn try_adopt_store_increase(&mut self, new: &RenderTargetsInfo) -> bool {
        let (ds, prev) = match (&new.depth_stencil, &self.info.depth_stencil) {
            (Some(ds), Some(prev)) => (ds, prev),
            _ => return true,
        };
        let depth_increase = ds.depth_store > prev.depth_store;
        let stencil_increase = ds.stencil_store > prev.stencil_store;
        if !depth_increase && !stencil_increase {
            return true;
        }
        if !self.features.contains(DeviceFeatures::DEFERRED_STORE_ACTIONS) {
            return false;
        }

        let mut new_depth_store = self.depth_store;
        let mut new_stencil_store = self.stencil_store;

        if depth_increase {
            if self.plan.depth.is_some() {
                let surface = &ds.texture;
                let depth_sample_count = surface
                    .msaa
                    .as_ref()
                    .map_or(surface.sample_count, |msaa| msaa.sample_count);
                let mismatch_fixup = self.sample_count != depth_sample_count;
                let high_level = if surface.msaa.is_some() && !mismatch_fixup {
                    StoreAction::MultisampleResolve
                } else {
                    ds.depth_store
                };
                new_depth_store = resolve_store_action(self.features, high_level);
            } else {
                return false;
            }
        }

        if stencil_increase {
            if self.plan.stencil.is_some() {
                new_stencil_store = resolve_store_action(self.features, ds.stencil_store);
            } else {
                return false;
            }
        }

        self.depth_store = new_depth_store;
        self.stencil_store = new_stencil_store;
        true
    }

    fn replan(&mut self, info: RenderTargetsInfo) -> Result<(), RenderTargetError> {
        profiling::scope!("RenderPassState::replan");

        let deferred = self.features.contains(DeviceFeatures::DEFERRED_STORE_ACTIONS);

        let mut plan = RenderTargetPlan::default();
        let mut new_color_store = [ResolvedStoreAction::DontCare; MAX_COLOR_TARGETS];
        let mut new_depth_store = ResolvedStoreAction::DontCare;
        let mut new_stencil_store = ResolvedStoreAction::DontCare;

        self.sample_count = 0;
        self.render_target_active = false;
        self.has_valid_render_target = false;
        self.has_valid_color_target = false;
        self.fallback_bound = false;
        self.can_restart_render_pass = true;

        let mut bound_targets = 0u8;
        let mut array_targets = 0u8;
        let mut array_render_layers = u32::MAX;
        let mut framebuffer_size: Option<Extent> = None;

        for (index, view) in info.colors.iter().enumerate() {
            let view = match view {
                Some(view) => view,
                None => continue,
            };
            let surface = &view.texture;

            let extent = surface.mip_extent(view.mip);
            framebuffer_size = Some(match framebuffer_size {
                None => extent,
                Some(size) => Extent {
                    width: size.width.min(extent.width),
                    height: size.height.min(extent.height),
                },
            });

            bound_targets |= 1 << index;

            if surface.dimension.is_layered() && view.array_slice.is_none() {
                array_targets |= 1 << index;
                array_render_layers = array_render_layers.min(surface.render_layers());
            }

            let attachment = if let Some(ref msaa) = surface.msaa {
                self.sample_count = msaa.sample_count;
                // Only one MRT is expected when using MSAA.
                debug_assert_eq!(info.colors.len(), 1);
                new_color_store[index] =
                    resolve_store_action(self.features, StoreAction::MultisampleResolve);
                AttachmentPlan {
                    texture: Arc::clone(msaa),
                    resolve: Some(Arc::clone(
                        surface.msaa_resolve.as_ref().unwrap_or(surface),
                    )),
                    mip: view.mip,
                    slice: view.array_slice.unwrap_or(0),
                    load: view.load,
                    store: if deferred {
                        ResolvedStoreAction::Deferred
                    } else {
                        new_color_store[index]
                    },
                }
            } else {
                self.sample_count = 1;
                new_color_store[index] = resolve_store_action(self.features, view.store);
                AttachmentPlan {
                    texture: Arc::clone(surface),
                    resolve: None,
                    mip: view.mip,
                    slice: view.array_slice.unwrap_or(0),
                    load: view.load,
                    store: if deferred {
                        ResolvedStoreAction::Deferred
                    } else {
                        new_color_store[index]
                    },
                }
            };

            self.can_restart_render_pass &= self.sample_count <= 1
                && attachment.load == LoadAction::Load
                && view.store == StoreAction::Store;

            plan.colors[index] = Some(attachment);
            self.has_valid_render_target = true;
            self.has_valid_color_target = true;
        }

        plan.array_length = 1;
        if array_targets != 0 {
            if !self.features.contains(DeviceFeatures::LAYERED_RENDERING) {
                if array_render_layers != 1 {
                    log::error!("layered rendering is unsupported on this device");
                    return Err(RenderTargetError::LayeredRenderingUnsupported);
                }
            } else if array_targets == bound_targets {
                plan.array_length = array_render_layers;
            } else {
                log::error!(
                    "all color render targets must be layered when performing multi-layered \
                     rendering"
                );
                return Err(RenderTargetError::MixedLayeredTargets);
            }
        }

        if let Some(ref ds) = info.depth_stencil {
            self.plan_depth_stencil(
                ds,
                array_targets,
                &mut plan,
                &mut framebuffer_size,
                &mut new_depth_store,
                &mut new_stencil_store,
            )?;
        }

        self.color_store = new_color_store;
        self.depth_store = new_depth_store;
        self.stencil_store = new_stencil_store;

        self.has_valid_render_target |= info.uav_count > 0;
        if self.sample_count == 0 {
            self.sample_count = 1;
        }
        plan.sample_count = self.sample_count;

        self.render_target_active = self.has_valid_render_target;
        self.framebuffer_size = framebuffer_size.unwrap_or_default();

        // This assignment releases the previous pass's retained
        // attachments and retains the new ones.
        self.info = info;
        self.plan = plan;

        Ok(())
    }

    fn plan_depth_stencil(
        &mut self,
        ds: &DepthStencilTargetView,
        array_targets: u8,
        plan: &mut RenderTargetPlan,
        framebuffer_size: &mut Option<Extent>,
        new_depth_store: &mut ResolvedStoreAction,
        new_stencil_store: &mut ResolvedStoreAction,
    ) -> Result<(), RenderTargetError> {
        let deferred = self.features.contains(DeviceFeatures::DEFERRED_STORE_ACTIONS);
        let surface = &ds.texture;

        let layers = surface.render_layers();
        if array_targets == 0 && layers > 1 {
            if !self.features.contains(DeviceFeatures::LAYERED_RENDERING) {
                log::error!("layered rendering is unsupported on this device");
                return Err(RenderTargetError::LayeredRenderingUnsupported);
            }
            plan.array_length = layers;
        }

        let extent = surface.mip_extent(0);
        *framebuffer_size = Some(match *framebuffer_size {
            None => extent,
            Some(size) => Extent {
                width: size.width.min(extent.width),
                height: size.height.min(extent.height),
            },
        });

        let separate_resolve = self
            .features
            .contains(DeviceFeatures::SEPARATE_MSAA_RESOLVE_TARGET);

        let mut depth_texture = match surface.msaa {
            Some(ref msaa) => Arc::clone(msaa),
            None => Arc::clone(surface),
        };
        let mut depth_sample_count = depth_texture.sample_count;
        let mut mismatch_fixup = false;
        if self.sample_count == 0 {
            self.sample_count = depth_sample_count;
        } else if self.sample_count != depth_sample_count {
            if !separate_resolve {
                // Without separate resolve targets the high level may
                // legitimately hand us mismatched counts; bind the
                // resolved texture directly and skip the resolve step.
                depth_texture = Arc::clone(surface);
                mismatch_fixup = true;
                depth_sample_count = 1;
            } else {
                log::error!(
                    "if we support separate targets the high level should always give us \
                     matching sample counts"
                );
            }
        }
        let stencil_texture: Option<Arc<TextureInfo>> = match surface.format {
            kt::PixelFormat::Depth32Float => surface.stencil.clone(),
            kt::PixelFormat::Stencil8
            | kt::PixelFormat::Depth32FloatStencil8
            | kt::PixelFormat::Depth24UnormStencil8 => Some(Arc::clone(&depth_texture)),
            _ => None,
        };

        let using_depth = ds.access.is_using_depth() && surface.format.has_depth();
        if using_depth {
            let mut high_level = if surface.msaa.is_some() && !mismatch_fixup {
                StoreAction::MultisampleResolve
            } else {
                ds.depth_store
            };
            if high_level == StoreAction::DontCare || mismatch_fixup {
                high_level = if depth_sample_count > 1 {
                    StoreAction::MultisampleResolve
                } else {
                    StoreAction::Store
                };
            }

            let msaa_depth_resolve = self.features.contains(DeviceFeatures::MSAA_DEPTH_RESOLVE);
            *new_depth_store = if surface.msaa.is_none() || msaa_depth_resolve {
                resolve_store_action(self.features, high_level)
            } else {
                ResolvedStoreAction::DontCare
            };

            let resolve = if surface.msaa.is_some() && msaa_depth_resolve && !mismatch_fixup {
                Some(Arc::clone(surface.msaa_resolve.as_ref().unwrap_or(surface)))
            } else {
                None
            };

            plan.depth = Some(AttachmentPlan {
                texture: Arc::clone(&depth_texture),
                resolve,
                mip: 0,
                slice: 0,
                load: ds.depth_load,
                store: if deferred && surface.msaa.is_some() {
                    ResolvedStoreAction::Deferred
                } else {
                    *new_depth_store
                },
            });

            self.has_valid_render_target = true;
            self.fallback_bound = self.is_fallback(surface);

            self.can_restart_render_pass &= self.sample_count <= 1
                && (self.fallback_bound
                    || (ds.depth_load == LoadAction::Load
                        && (!ds.access.is_depth_write()
                            || ds.depth_store == StoreAction::Store)));
        }

        // With a sample-count mismatch there is no stencil auto-resolve
        // target to lean on, so stencil is skipped entirely unless the
        // device keeps combined depth/stencil usable through the fixup.
        let combined = self.features.contains(DeviceFeatures::COMBINED_DEPTH_STENCIL);
        let using_stencil = ds.access.is_using_stencil();
        if let Some(stencil_texture) = stencil_texture {
            if using_stencil && (combined || !mismatch_fixup) {
                let mut high_level = ds.stencil_store;
                if high_level == StoreAction::DontCare || mismatch_fixup {
                    high_level = StoreAction::Store;
                }

                // Depth+stencil MSAA cannot resolve depth while storing
                // stencil; without store-and-resolve the stencil contents
                // are dropped.
                let can_keep = stencil_texture.sample_count == 1
                    || resolve_store_action(self.features, StoreAction::MultisampleResolve)
                        == ResolvedStoreAction::StoreAndMultisampleResolve;
                *new_stencil_store = if can_keep {
                    resolve_store_action(self.features, high_level)
                } else {
                    ResolvedStoreAction::DontCare
                };

                plan.stencil = Some(AttachmentPlan {
                    texture: Arc::clone(&stencil_texture),
                    resolve: None,
                    mip: 0,
                    slice: 0,
                    load: ds.stencil_load,
                    store: if deferred && stencil_texture.sample_count > 1 {
                        ResolvedStoreAction::Deferred
                    } else {
                        *new_stencil_store
                    },
                });

                if self.sample_count == 0 {
                    self.sample_count = stencil_texture.sample_count;
                }

                self.has_valid_render_target = true;

                self.can_restart_render_pass &= self.sample_count <= 1
                    && (self.is_fallback(surface)
                        || (ds.stencil_load == LoadAction::Load
                            && (!ds.access.is_stencil_write()
                                || ds.stencil_store == StoreAction::Store)));
            } else if using_stencil && !combined && mismatch_fixup {
                debug_assert!(
                    !ds.access.is_stencil_write(),
                    "stencil write not allowed as there is no proper stencil to use"
                );
            }
        }

        Ok(())
    }

    /// Re-arms the current target set so an interrupted pass can
    /// continue: every load becomes `Load` and nothing re-clears.
    /// Returns false when the pass fundamentally cannot restart
    /// (multisampled contents would be lost).
    pub fn prepare_to_restart(&mut self) -> bool {
        if self.can_restart_render_pass {
            return true;
        }
        if self.sample_count > 1 {
            return false;
        }

        let deferred = self.features.contains(DeviceFeatures::DEFERRED_STORE_ACTIONS);
        let mut info = self.info.clone();
        for view in info.colors.iter_mut().flatten() {
            view.load = LoadAction::Load;
            debug_assert!(view.store == StoreAction::Store);
        }
        if let Some(ref mut ds) = info.depth_stencil {
            ds.depth_load = LoadAction::Load;
            debug_assert!(
                deferred || !ds.access.is_depth_write() || ds.depth_store == StoreAction::Store
            );
            ds.stencil_load = LoadAction::Load;
            debug_assert!(
                deferred
                    || !ds.access.is_stencil_write()
                    || ds.stencil_store == StoreAction::Store
            );
        }

        self.invalidate_render_targets();
        match self.set_render_targets(info) {
            Ok(_) => self.can_restart_render_pass,
            Err(error) => {
                log::error!("failed to restart render pass: {}", error);
                false
            }
        }
    }

    /// Forgets that a pass is active without touching the retained
    /// attachments; the next target set always starts a fresh pass.
    pub fn invalidate_render_targets(&mut self) {
        self.has_valid_render_target = false;
        self.render_target_active = false;
    }

    /// Downgrades the selected attachments' store actions to discard.
    pub fn discard_render_targets(&mut self, depth: bool, stencil: bool, color_bit_mask: u32) {
        if depth {
            self.depth_store = ResolvedStoreAction::DontCare;
        }
        if stencil {
            self.stencil_store = ResolvedStoreAction::DontCare;
        }
        for index in 0..MAX_COLOR_TARGETS {
            if color_bit_mask & (1 << index) != 0 {
                self.color_store[index] = ResolvedStoreAction::DontCare;
            }
        }
    }

    /// Emits the end-of-pass store actions. With `conditional_switch`
    /// the encoder is ending abnormally and will be restarted, so every
    /// multisampled attachment is forced to keep its samples.
    pub fn flush_store_actions(
        &mut self,
        sink: &mut impl CommandSink,
        conditional_switch: bool,
    ) {
        if conditional_switch && self.features.contains(DeviceFeatures::DEFERRED_STORE_ACTIONS) {
            for (index, attachment) in self.plan.colors.iter().enumerate() {
                if let Some(attachment) = attachment {
                    let multisampled = attachment.texture.sample_count > 1;
                    self.color_store[index] =
                        conditional_store_action(self.features, multisampled);
                }
            }
            if let Some(ref depth) = self.plan.depth {
                let multisampled = depth.texture.sample_count > 1;
                self.depth_store = conditional_store_action(self.features, multisampled);
                self.stencil_store = conditional_store_action(self.features, false);
            }
        }
        sink.set_store_actions(&self.color_store, self.depth_store, self.stencil_store);
    }

    /// Drops all pass state; the fallback surface registry survives.
    pub fn reset(&mut self) {
        let fallback = self.fallback_depth_stencil.take();
        *self = RenderPassState::new(self.features);
        self.fallback_depth_stencil = fallback;
    }
}
