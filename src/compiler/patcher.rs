//! Edge patcher: context-dependent rewriting of a compiled parent at the
//! moment it is handed to its consuming node, and of each root's final value.

use tracing::trace;

use crate::compiler::context::{CompileContext, ConsumerId};
use crate::compiler::CollectedData;
use crate::error::{CompileError, Result};
use crate::graph::{nodes, AttributeLocation, Expr, ExprKey, Op, ValueType};

impl<C: ConsumerId> CompileContext<C> {
    /// Rewrites `input` for the edge into `consumer` (`None` for a root's
    /// final value, where no consuming node is known).
    ///
    /// Three independent stages, in order: device-data transformation at
    /// host/device crossing edges, typed-buffer unwrapping with usage
    /// recording (unconditional), and attribute-read rewriting for
    /// spawn/event compilation.
    pub(crate) fn patch_expression(
        &mut self,
        mut input: Expr,
        consumer: Option<&Expr>,
        device_transform: bool,
        patch_attribute_reads: bool,
        collected: &mut CollectedData,
    ) -> Result<Expr> {
        if device_transform {
            input = self.transform_for_device(input, consumer, collected)?;
        }

        if input.value_type() == ValueType::Buffer {
            if let Op::BufferWithUsage(usage) = *input.op() {
                // The wrapper is a typing marker over the raw buffer. The
                // built-in constructor always supplies the parent, but the
                // node catalog is open, so a missing parent fails fast.
                let raw = input
                    .parents()
                    .first()
                    .cloned()
                    .ok_or(CompileError::MalformedBufferWrapper)?;
                collected.record_buffer_usage(ExprKey::of(&raw), usage)?;
                input = raw;
            }
        }

        if patch_attribute_reads {
            let current_read = match input.op() {
                Op::ReadAttribute {
                    name,
                    location: AttributeLocation::Current,
                } => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = current_read {
                let layout = self
                    .event_layout()
                    .ok_or(CompileError::MissingEventLayout)?;
                let element = layout
                    .iter()
                    .find(|desc| desc.name == name)
                    .ok_or_else(|| CompileError::UnresolvedEventAttribute(name.clone()))?;
                trace!(attribute = %name, offset = element.element_offset, "patched attribute read");
                input = nodes::read_event_attribute(
                    name,
                    input.value_type(),
                    element.element_offset,
                );
            }
        }

        Ok(input)
    }

    /// Device-data transformation, applied exactly at the host/device
    /// crossing edge: host-side resource values are rewritten into the forms
    /// the device consumes them through.
    fn transform_for_device(
        &mut self,
        input: Expr,
        consumer: Option<&Expr>,
        collected: &mut CollectedData,
    ) -> Result<Expr> {
        match input.value_type() {
            ValueType::ColorGradient => Ok(nodes::bake_gradient(input)),
            ValueType::Curve => Ok(nodes::bake_curve(input)),

            ValueType::Mesh => {
                let Some(consumer) = consumer else {
                    // Value declared but never sampled; nothing to rewrite.
                    return Ok(input);
                };
                match consumer.op() {
                    Op::SampleMeshVertexFloat
                    | Op::SampleMeshVertexFloat2
                    | Op::SampleMeshVertexFloat3
                    | Op::SampleMeshVertexFloat4
                    | Op::SampleMeshVertexColor => {
                        let channel = self.compile_channel_descriptor(consumer, collected)?;
                        Ok(nodes::vertex_buffer_from_mesh(input, channel))
                    }
                    Op::SampleMeshIndex => Ok(nodes::index_buffer_from_mesh(input)),
                    other => Err(CompileError::UnexpectedSampleOperation(other.clone())),
                }
            }

            ValueType::SkinnedMesh => {
                let Some(consumer) = consumer else {
                    return Ok(input);
                };
                match consumer.op() {
                    Op::SampleSkinnedMeshVertex { frame } => {
                        let frame = *frame;
                        let channel = self.compile_channel_descriptor(consumer, collected)?;
                        Ok(nodes::vertex_buffer_from_skinned_mesh(input, channel, frame))
                    }
                    other => Err(CompileError::MissingFrameCapability(other.clone())),
                }
            }

            // Nothing to patch for this type.
            _ => Ok(input),
        }
    }

    /// Mesh sampling consumers carry their channel descriptor as their third
    /// parent. It is compiled through the shared cache before being attached
    /// to the buffer view.
    fn compile_channel_descriptor(
        &mut self,
        consumer: &Expr,
        collected: &mut CollectedData,
    ) -> Result<Expr> {
        let descriptor = consumer
            .parents()
            .get(2)
            .cloned()
            .ok_or_else(|| CompileError::InvalidChannelDescriptor(consumer.op().clone()))?;
        let descriptor = self.compile_with(&descriptor, collected)?;
        if !matches!(descriptor.op(), Op::MeshChannelInfo) {
            return Err(CompileError::InvalidChannelDescriptor(
                descriptor.op().clone(),
            ));
        }
        Ok(descriptor)
    }
}
