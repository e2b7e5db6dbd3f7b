//! Shader reflection to engine parameter tables.
//!
//! A compiled shader reports its bound resources through a reflection
//! interface; the engine's generic binding system wants a flat table of
//! named allocations. This module walks the reflection data, classifies
//! every binding, and emits that table, tracking the running register
//! maxima the runtime needs to size its descriptor ranges.
//!
//! Everything here operates on our own reflection data model — the
//! native reflection interface is adapted into [`ShaderReflection`] by
//! the platform shader-format backends.

use crate::FastHashMap;
use smallvec::SmallVec;
use std::fmt;
use thiserror::Error;

/// The name the source compiler gives the implicit constant buffer that
/// collects loose global parameters.
pub const GLOBALS_BUFFER_NAME: &str = "$Globals";

/// The raw reflection type code for acceleration structures. The vendor
/// compiler emits it, but the SDK headers shipped before the enum did;
/// match the numeric value until the headers catch up.
pub const ACCELERATION_STRUCTURE_TYPE_CODE: u32 = 12;

/// Classification of one reflected resource binding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResourceBindingType {
    /// `cbuffer` constant buffer.
    ConstantBuffer,
    /// `tbuffer` texture buffer; treated as a constant buffer.
    TextureBuffer,
    /// Sampled texture.
    Texture,
    /// Sampler state.
    Sampler,
    /// RW typed buffer/texture UAV.
    UavRwTyped,
    /// RW structured buffer UAV.
    UavRwStructured,
    /// RW byte-address buffer UAV.
    UavRwByteAddress,
    /// RW structured buffer with a hidden counter.
    UavRwStructuredWithCounter,
    /// Append structured buffer.
    UavAppendStructured,
    /// Read-only structured buffer.
    StructuredBuffer,
    /// Read-only byte-address buffer.
    ByteAddressBuffer,
    /// A type code the enum does not cover; carried raw.
    Raw(u32),
}

/// One resource binding as the reflection interface reports it.
#[derive(Clone, Debug)]
pub struct ResourceBindingDesc {
    pub name: String,
    pub ty: ResourceBindingType,
    pub bind_point: u32,
    pub bind_count: u32,
    /// Register space; bindings outside the compile's binding space are
    /// ignored.
    pub space: u32,
}

/// One variable inside a constant buffer.
#[derive(Clone, Debug)]
pub struct ConstantBufferVariable {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    /// Whether the compiler saw the variable actually read.
    pub used: bool,
}

/// A reflected constant buffer and its members.
#[derive(Clone, Debug)]
pub struct ConstantBufferDesc {
    pub name: String,
    pub variables: Vec<ConstantBufferVariable>,
}

/// The reflection data of one compiled shader.
#[derive(Clone, Debug, Default)]
pub struct ShaderReflection {
    pub bound_resources: Vec<ResourceBindingDesc>,
    pub constant_buffers: Vec<ConstantBufferDesc>,
}

impl ShaderReflection {
    fn constant_buffer(&self, name: &str) -> Option<&ConstantBufferDesc> {
        self.constant_buffers.iter().find(|cb| cb.name == name)
    }
}

/// How the engine binds one named parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShaderParameterType {
    /// A byte range inside the implicit global constant buffer.
    LooseData,
    /// A whole named uniform buffer.
    UniformBuffer,
    /// Sampler.
    Sampler,
    /// Read-only shader resource.
    Srv,
    /// Writable unordered-access resource.
    Uav,
}

/// One entry in the flattened parameter table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParameterAllocation {
    /// Constant buffer index for loose data; zero otherwise.
    pub buffer_index: u32,
    /// Byte offset for loose data, register index for everything else.
    pub base_index: u32,
    /// Byte size for loose data, register count for everything else.
    pub size: u32,
    pub ty: ShaderParameterType,
}

/// The flat name-to-allocation table the engine binding system consumes.
#[derive(Clone, Debug, Default)]
pub struct ParameterMap {
    map: FastHashMap<String, ParameterAllocation>,
}

impl ParameterMap {
    pub fn add_allocation(
        &mut self,
        name: &str,
        buffer_index: u32,
        base_index: u32,
        size: u32,
        ty: ShaderParameterType,
    ) {
        let previous = self.map.insert(
            name.to_string(),
            ParameterAllocation {
                buffer_index,
                base_index,
                size,
                ty,
            },
        );
        if previous.is_some() {
            log::warn!("shader parameter {} allocated twice", name);
        }
    }

    pub fn allocation(&self, name: &str) -> Option<&ParameterAllocation> {
        self.map.get(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterAllocation)> {
        self.map.iter().map(|(name, alloc)| (name.as_str(), alloc))
    }

    /// Names of every loose-data parameter, for diagnostics.
    fn loose_parameter_names(&self) -> SmallVec<[&str; 8]> {
        let mut names: SmallVec<[&str; 8]> = self
            .map
            .iter()
            .filter(|(_, alloc)| alloc.ty == ShaderParameterType::LooseData)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// A structured compiler diagnostic attached to the offending shader.
#[derive(Clone, Debug, Error)]
#[error("{virtual_file}: {message}")]
pub struct CompilerDiagnostic {
    /// Virtual path of the source the shader was compiled from.
    pub virtual_file: String,
    pub message: String,
}

/// Aggregated output of one shader compile.
#[derive(Clone, Debug, Default)]
pub struct CompileOutput {
    pub parameter_map: ParameterMap,
    pub errors: Vec<CompilerDiagnostic>,
    pub succeeded: bool,

    /// Whether any loose global ended up in the implicit buffer.
    pub global_uniform_buffer_used: bool,
    /// Constant buffer slots with live bindings.
    pub used_uniform_buffer_slots: u64,
    /// Slot-indexed names of the named uniform buffers.
    pub uniform_buffer_names: Vec<Option<String>>,

    // Running register maxima, each `bind_point + bind_count`.
    pub num_constant_buffers: u32,
    pub num_srvs: u32,
    pub num_uavs: u32,
    pub num_samplers: u32,
}

impl fmt::Display for CompileOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} parameters, cbs={} srvs={} uavs={} samplers={}",
            self.parameter_map.len(),
            self.num_constant_buffers,
            self.num_srvs,
            self.num_uavs,
            self.num_samplers
        )
    }
}

impl CompileOutput {
    fn note_uniform_buffer(&mut self, index: u32, name: &str) {
        self.used_uniform_buffer_slots |= 1 << index;
        if self.uniform_buffer_names.len() <= index as usize {
            self.uniform_buffer_names.resize(index as usize + 1, None);
        }
        self.uniform_buffer_names[index as usize] = Some(name.to_string());
    }
}

/// Walks a shader's reflection data and adds parameter allocations for
/// every resource in the requested binding space.
///
/// Calling this repeatedly for several functions of one library merges
/// their reflection into the same output.
pub fn extract_parameter_map(
    reflection: &ShaderReflection,
    binding_space: u32,
    output: &mut CompileOutput,
) {
    for bind_desc in &reflection.bound_resources {
        if bind_desc.space != binding_space {
            continue;
        }

        match bind_desc.ty {
            ResourceBindingType::ConstantBuffer | ResourceBindingType::TextureBuffer => {
                let cb_index = bind_desc.bind_point;
                let cb = match reflection.constant_buffer(&bind_desc.name) {
                    Some(cb) => cb,
                    None => continue,
                };

                if cb.name == GLOBALS_BUFFER_NAME {
                    // Track each used variable individually inside the
                    // implicit buffer.
                    for variable in &cb.variables {
                        if variable.used {
                            output.global_uniform_buffer_used = true;
                            output.parameter_map.add_allocation(
                                &variable.name,
                                cb_index,
                                variable.offset,
                                variable.size,
                                ShaderParameterType::LooseData,
                            );
                            output.used_uniform_buffer_slots |= 1 << cb_index;
                        }
                    }
                } else {
                    // Track just the buffer itself.
                    output.parameter_map.add_allocation(
                        &cb.name,
                        cb_index,
                        0,
                        0,
                        ShaderParameterType::UniformBuffer,
                    );
                    output.note_uniform_buffer(cb_index, &cb.name);
                }

                output.num_constant_buffers = output
                    .num_constant_buffers
                    .max(bind_desc.bind_point + bind_desc.bind_count);
            }
            ResourceBindingType::Texture | ResourceBindingType::Sampler => {
                debug_assert_eq!(bind_desc.bind_count, 1);
                let ty = if bind_desc.ty == ResourceBindingType::Sampler {
                    output.num_samplers = output.num_samplers.max(bind_desc.bind_point + 1);
                    ShaderParameterType::Sampler
                } else {
                    output.num_srvs = output.num_srvs.max(bind_desc.bind_point + 1);
                    ShaderParameterType::Srv
                };

                // The sampler index of a texture parameter stays
                // unallocated here.
                output
                    .parameter_map
                    .add_allocation(&bind_desc.name, 0, bind_desc.bind_point, 1, ty);
            }
            ResourceBindingType::UavRwTyped
            | ResourceBindingType::UavRwStructured
            | ResourceBindingType::UavRwByteAddress
            | ResourceBindingType::UavRwStructuredWithCounter
            | ResourceBindingType::UavAppendStructured => {
                debug_assert_eq!(bind_desc.bind_count, 1);
                output.parameter_map.add_allocation(
                    &bind_desc.name,
                    0,
                    bind_desc.bind_point,
                    1,
                    ShaderParameterType::Uav,
                );
                output.num_uavs = output.num_uavs.max(bind_desc.bind_point + 1);
            }
            ResourceBindingType::StructuredBuffer | ResourceBindingType::ByteAddressBuffer => {
                debug_assert_eq!(bind_desc.bind_count, 1);
                output.parameter_map.add_allocation(
                    &bind_desc.name,
                    0,
                    bind_desc.bind_point,
                    1,
                    ShaderParameterType::Srv,
                );
                output.num_srvs = output.num_srvs.max(bind_desc.bind_point + 1);
            }
            ResourceBindingType::Raw(code) if code == ACCELERATION_STRUCTURE_TYPE_CODE => {
                // Acceleration structures are treated as SRVs.
                debug_assert_eq!(bind_desc.bind_count, 1);
                output.parameter_map.add_allocation(
                    &bind_desc.name,
                    0,
                    bind_desc.bind_point,
                    1,
                    ShaderParameterType::Srv,
                );
                output.num_srvs = output.num_srvs.max(bind_desc.bind_point + 1);
            }
            ResourceBindingType::Raw(code) => {
                log::warn!(
                    "unrecognized reflection type code {} for {}",
                    code,
                    bind_desc.name
                );
            }
        }
    }
}

/// Finishes a compile: ray-tracing shaders have no register space for
/// the implicit global buffer, so any loose global there is a hard
/// error naming every offending parameter.
pub fn finish_compile(output: &mut CompileOutput, is_ray_tracing: bool, virtual_file: &str) {
    output.succeeded = output.errors.is_empty();

    if is_ray_tracing && output.global_uniform_buffer_used {
        let mut message =
            String::from("Global constant buffer cannot be used in a ray tracing shader.");
        let loose = output.parameter_map.loose_parameter_names();
        if !loose.is_empty() {
            message.push_str(" Global parameters: ");
            message.push_str(&loose.join(", "));
            message.push('.');
        }
        output.errors.push(CompilerDiagnostic {
            virtual_file: virtual_file.to_string(),
            message,
        });
        output.succeeded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(
        name: &str,
        ty: ResourceBindingType,
        bind_point: u32,
    ) -> ResourceBindingDesc {
        ResourceBindingDesc {
            name: name.to_string(),
            ty,
            bind_point,
            bind_count: 1,
            space: 0,
        }
    }

    fn globals_reflection() -> ShaderReflection {
        ShaderReflection {
            bound_resources: vec![
                resource("$Globals", ResourceBindingType::ConstantBuffer, 0),
                resource("ViewUniforms", ResourceBindingType::ConstantBuffer, 1),
                resource("SceneColor", ResourceBindingType::Texture, 0),
                resource("SceneColorSampler", ResourceBindingType::Sampler, 0),
                resource("OutputBuffer", ResourceBindingType::UavRwStructured, 2),
                resource("Vertices", ResourceBindingType::StructuredBuffer, 3),
                resource(
                    "TLAS",
                    ResourceBindingType::Raw(ACCELERATION_STRUCTURE_TYPE_CODE),
                    4,
                ),
            ],
            constant_buffers: vec![
                ConstantBufferDesc {
                    name: "$Globals".to_string(),
                    variables: vec![
                        ConstantBufferVariable {
                            name: "Exposure".to_string(),
                            offset: 0,
                            size: 4,
                            used: true,
                        },
                        ConstantBufferVariable {
                            name: "UnusedKnob".to_string(),
                            offset: 4,
                            size: 4,
                            used: false,
                        },
                    ],
                },
                ConstantBufferDesc {
                    name: "ViewUniforms".to_string(),
                    variables: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn classification_and_register_maxima() {
        let mut output = CompileOutput::default();
        extract_parameter_map(&globals_reflection(), 0, &mut output);

        let exposure = output.parameter_map.allocation("Exposure").unwrap();
        assert_eq!(exposure.ty, ShaderParameterType::LooseData);
        assert_eq!((exposure.buffer_index, exposure.base_index, exposure.size), (0, 0, 4));
        assert!(output.parameter_map.allocation("UnusedKnob").is_none());
        assert!(output.global_uniform_buffer_used);

        let view = output.parameter_map.allocation("ViewUniforms").unwrap();
        assert_eq!(view.ty, ShaderParameterType::UniformBuffer);
        assert_eq!(view.buffer_index, 1);
        assert_eq!(output.uniform_buffer_names[1].as_deref(), Some("ViewUniforms"));
        assert_eq!(output.used_uniform_buffer_slots, 0b11);

        assert_eq!(
            output.parameter_map.allocation("SceneColor").unwrap().ty,
            ShaderParameterType::Srv
        );
        assert_eq!(
            output.parameter_map.allocation("SceneColorSampler").unwrap().ty,
            ShaderParameterType::Sampler
        );
        assert_eq!(
            output.parameter_map.allocation("OutputBuffer").unwrap().ty,
            ShaderParameterType::Uav
        );
        assert_eq!(
            output.parameter_map.allocation("Vertices").unwrap().ty,
            ShaderParameterType::Srv
        );
        // Acceleration structures land as SRVs despite the raw type code.
        assert_eq!(
            output.parameter_map.allocation("TLAS").unwrap().ty,
            ShaderParameterType::Srv
        );

        assert_eq!(output.num_constant_buffers, 2);
        assert_eq!(output.num_srvs, 5);
        assert_eq!(output.num_uavs, 3);
        assert_eq!(output.num_samplers, 1);
    }

    #[test]
    fn other_binding_spaces_are_ignored() {
        let mut reflection = globals_reflection();
        for binding in reflection.bound_resources.iter_mut() {
            binding.space = 3;
        }
        let mut output = CompileOutput::default();
        extract_parameter_map(&reflection, 0, &mut output);
        assert!(output.parameter_map.is_empty());
    }

    #[test]
    fn ray_tracing_rejects_loose_globals() {
        let mut output = CompileOutput::default();
        extract_parameter_map(&globals_reflection(), 0, &mut output);
        finish_compile(&mut output, true, "/Project/RayGen.usf");

        assert!(!output.succeeded);
        assert_eq!(output.errors.len(), 1);
        let message = output.errors[0].to_string();
        assert!(message.contains("Global constant buffer cannot be used"));
        assert!(message.contains("Exposure"));
        assert!(!message.contains("UnusedKnob"));
    }

    #[test]
    fn raster_compile_with_globals_succeeds() {
        let mut output = CompileOutput::default();
        extract_parameter_map(&globals_reflection(), 0, &mut output);
        finish_compile(&mut output, false, "/Project/Tonemap.usf");
        assert!(output.succeeded);
        assert!(output.errors.is_empty());
    }
}
