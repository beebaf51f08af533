//! Built-in node set.
//!
//! These are the nodes the compiler itself knows how to construct: the device
//! forms the patcher substitutes at host/device crossings, the typed-buffer
//! and attribute-read markers callers put into their graphs, and the rewritten
//! event-attribute read. Everything else comes from an external node catalog
//! through the [`ExprNode`] trait.

use std::any::Any;
use std::rc::Rc;

use crate::error::{CompileError, Result};
use crate::graph::{
    AttributeLocation, BufferUsage, Expr, ExprFlags, ExprNode, Op, ParentList, SkinFrame,
    ValueType,
};

/// Generic operation node. None of the built-in forms are host-evaluable, so
/// `evaluate` always fails; the evaluation policy never selects them.
#[derive(Clone)]
struct OpExpr {
    op: Op,
    value_type: ValueType,
    flags: ExprFlags,
    parents: ParentList,
}

impl OpExpr {
    fn build(op: Op, value_type: ValueType, flags: ExprFlags, parents: ParentList) -> Expr {
        Rc::new(OpExpr {
            op,
            value_type,
            flags,
            parents,
        })
    }
}

impl ExprNode for OpExpr {
    fn op(&self) -> &Op {
        &self.op
    }

    fn value_type(&self) -> ValueType {
        self.value_type
    }

    fn parents(&self) -> &[Expr] {
        &self.parents
    }

    fn flags(&self) -> ExprFlags {
        self.flags
    }

    fn evaluate(&self, _parents: &[Expr]) -> Result<Expr> {
        Err(CompileError::Evaluation(format!(
            "{:?} cannot be evaluated on the host",
            self.op
        )))
    }

    fn reduce(&self, parents: &[Expr]) -> Expr {
        Rc::new(OpExpr {
            op: self.op.clone(),
            value_type: self.value_type,
            flags: self.flags,
            parents: parents.iter().cloned().collect(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Gradient baked into a device texture.
pub fn bake_gradient(gradient: Expr) -> Expr {
    OpExpr::build(
        Op::BakeGradient,
        ValueType::Texture,
        ExprFlags::NOT_COMPILABLE_ON_HOST,
        ParentList::from_iter([gradient]),
    )
}

/// Curve baked into a device texture.
pub fn bake_curve(curve: Expr) -> Expr {
    OpExpr::build(
        Op::BakeCurve,
        ValueType::Texture,
        ExprFlags::NOT_COMPILABLE_ON_HOST,
        ParentList::from_iter([curve]),
    )
}

/// Vertex buffer view over a mesh, described by a channel descriptor.
pub fn vertex_buffer_from_mesh(mesh: Expr, channel: Expr) -> Expr {
    OpExpr::build(
        Op::VertexBufferFromMesh,
        ValueType::Buffer,
        ExprFlags::NOT_COMPILABLE_ON_HOST,
        ParentList::from_iter([mesh, channel]),
    )
}

/// Index buffer view over a mesh.
pub fn index_buffer_from_mesh(mesh: Expr) -> Expr {
    OpExpr::build(
        Op::IndexBufferFromMesh,
        ValueType::Buffer,
        ExprFlags::NOT_COMPILABLE_ON_HOST,
        ParentList::from_iter([mesh]),
    )
}

/// Vertex buffer view over a skinned mesh at the consumer's selected frame.
pub fn vertex_buffer_from_skinned_mesh(mesh: Expr, channel: Expr, frame: SkinFrame) -> Expr {
    OpExpr::build(
        Op::VertexBufferFromSkinnedMesh { frame },
        ValueType::Buffer,
        ExprFlags::NOT_COMPILABLE_ON_HOST,
        ParentList::from_iter([mesh, channel]),
    )
}

/// Channel format/dimension/stream descriptor for mesh vertex sampling.
/// Mesh sampling consumers carry one of these as their third parent.
pub fn mesh_channel_info(parents: Vec<Expr>) -> Expr {
    OpExpr::build(
        Op::MeshChannelInfo,
        ValueType::Uint32,
        ExprFlags::NOT_COMPILABLE_ON_HOST,
        parents.into_iter().collect(),
    )
}

/// Typed view over a raw buffer. The patcher strips the wrapper and records
/// the declared usage against the underlying raw node.
pub fn buffer_with_usage(raw: Expr, usage: BufferUsage) -> Expr {
    OpExpr::build(
        Op::BufferWithUsage(usage),
        ValueType::Buffer,
        ExprFlags::NOT_COMPILABLE_ON_HOST,
        ParentList::from_iter([raw]),
    )
}

/// Attribute read against the running element store.
pub fn attribute_read(name: impl Into<String>, location: AttributeLocation, value_type: ValueType) -> Expr {
    OpExpr::build(
        Op::ReadAttribute {
            name: name.into(),
            location,
        },
        value_type,
        ExprFlags::NONE,
        ParentList::new(),
    )
}

/// Attribute read rewritten against the event payload layout.
pub fn read_event_attribute(name: impl Into<String>, value_type: ValueType, element_offset: u32) -> Expr {
    OpExpr::build(
        Op::ReadEventAttribute {
            name: name.into(),
            element_offset,
        },
        value_type,
        ExprFlags::NONE,
        ParentList::new(),
    )
}
