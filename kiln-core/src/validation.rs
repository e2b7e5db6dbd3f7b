//! Draw-time binding validation.
//!
//! A shader that samples an unbound texture or reads an unbound buffer
//! does not fail politely: the driver crashes with no actionable
//! information. This module cross-checks the reflection-derived required
//! resources of the active pipeline against what the application actually
//! bound, immediately before a draw or dispatch, and logs exactly which
//! slot is missing. Failures do not abort the frame — aborting every draw
//! with a missing binding would make the diagnostic itself unusable
//! during iterative shader development.
//!
//! Two strengths exist, selected by ordered [`DebugLevel`] thresholds:
//! a cheap mask-subset check from `FastValidation` up, and the full
//! argument walk (including texture dimensionality) from `Validation` up.

use crate::binding::{mask_indices, mask_indices_u64, StageBindingSet};
use crate::pipeline::{Shader, ShaderArgument};
use kt::DebugLevel;

/// Validates one stage's bindings against one shader's requirements.
///
/// Returns false when any required resource is unbound or mismatched;
/// every failure is logged with the stage, slot index and argument
/// description.
pub fn validate_stage(level: DebugLevel, bindings: &StageBindingSet, shader: &Shader) -> bool {
    if level >= DebugLevel::Validation {
        validate_arguments(bindings, shader)
    } else if level >= DebugLevel::FastValidation {
        validate_masks(bindings, shader)
    } else {
        true
    }
}

/// Full reflection walk: per-argument occupancy, plus dimensionality for
/// textures. A 2D texture bound where a cube map is expected crashes the
/// driver just as surely as an unbound slot.
fn validate_arguments(bindings: &StageBindingSet, shader: &Shader) -> bool {
    let mut ok = true;
    for argument in &shader.bindings.arguments {
        match *argument {
            ShaderArgument::Buffer { index, ref name } => {
                if !bindings.buffers.is_bound(index as usize) {
                    ok = false;
                    log::warn!(
                        "unbound buffer at {:?} index {} which will crash the driver: {}",
                        shader.stage,
                        index,
                        name
                    );
                }
            }
            ShaderArgument::ThreadgroupMemory { .. } => {}
            ShaderArgument::Texture {
                index,
                dimension,
                ref name,
            } => match bindings.textures.get(index as usize) {
                None => {
                    ok = false;
                    log::warn!(
                        "unbound texture at {:?} index {} which will crash the driver: {}",
                        shader.stage,
                        index,
                        name
                    );
                }
                Some(bound) if bound.dimension != dimension => {
                    ok = false;
                    log::warn!(
                        "incorrect texture type bound at {:?} index {} which will crash the \
                         driver: {} expects {:?}, bound {:?}",
                        shader.stage,
                        index,
                        name,
                        dimension,
                        bound.dimension
                    );
                }
                Some(_) => {}
            },
            ShaderArgument::Sampler { index, ref name } => {
                if !bindings.samplers.is_bound(index as usize) {
                    ok = false;
                    log::warn!(
                        "unbound sampler at {:?} index {} which will crash the driver: {}",
                        shader.stage,
                        index,
                        name
                    );
                }
            }
        }
    }
    ok
}

/// Mask subset check: `required & bound == required` per category.
fn validate_masks(bindings: &StageBindingSet, shader: &Shader) -> bool {
    let mut ok = true;

    let required = shader.bindings.texture_mask;
    let missing = required & !bindings.textures.bound_mask();
    if missing != 0 {
        ok = false;
        for index in mask_indices(missing) {
            log::warn!(
                "unbound texture at {:?} index {} which will crash the driver",
                shader.stage,
                index
            );
        }
    }

    let required = shader.bindings.buffer_mask;
    let missing = required & !bindings.buffers.bound_mask();
    if missing != 0 {
        ok = false;
        for index in mask_indices_u64(missing as u64) {
            log::warn!(
                "unbound buffer at {:?} index {} which will crash the driver",
                shader.stage,
                index
            );
        }
    }

    let required = shader.bindings.sampler_mask;
    let missing = required & !bindings.samplers.bound_mask();
    if missing != 0 {
        ok = false;
        for index in mask_indices_u64(missing as u64) {
            log::warn!(
                "unbound sampler at {:?} index {} which will crash the driver",
                shader.stage,
                index
            );
        }
    }

    ok
}
