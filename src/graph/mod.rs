//! # Expression Graph Model
//!
//! The data model the compiler operates on: immutable expression nodes shared
//! through reference-counted handles, forming a DAG.
//!
//! Nodes are opaque to the compiler beyond the contract of [`ExprNode`]:
//! an operation identity, a declared value type, an ordered parent list and a
//! flag set, plus the `evaluate`/`reduce` capabilities supplied by the node
//! catalog. The compiler never mutates a source node; it only produces new
//! reduced nodes or returns the original handle unchanged.
//!
//! Acyclicity is a precondition of the whole crate, not something this module
//! enforces: constructing a cycle is caller error.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::Result;

pub mod nodes;

/// Shared handle to an expression node.
pub type Expr = Rc<dyn ExprNode>;

/// Parent list storage. Parent counts are almost always tiny.
pub type ParentList = SmallVec<[Expr; 4]>;

/// Node capability flags, fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExprFlags(u16);

impl ExprFlags {
    pub const NONE: ExprFlags = ExprFlags(0);
    /// The node is a concrete value rather than a derived computation.
    pub const VALUE: ExprFlags = ExprFlags(1 << 0);
    /// The value never changes between compilations.
    pub const CONSTANT: ExprFlags = ExprFlags(1 << 1);
    /// The value may be folded into its consumers at compile time.
    pub const FOLDABLE: ExprFlags = ExprFlags(1 << 2);
    /// The node can only be realized on the device side.
    pub const NOT_COMPILABLE_ON_HOST: ExprFlags = ExprFlags(1 << 3);
    /// Host evaluation of this node would produce garbage.
    pub const INVALID_ON_HOST: ExprFlags = ExprFlags(1 << 4);
    /// The node looks constant but must not be treated as one.
    pub const INVALID_CONSTANT: ExprFlags = ExprFlags(1 << 5);

    /// True when every bit of `other` is set.
    pub fn contains(self, other: ExprFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set.
    pub fn intersects(self, other: ExprFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ExprFlags {
    type Output = ExprFlags;
    fn bitor(self, rhs: ExprFlags) -> ExprFlags {
        ExprFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ExprFlags {
    fn bitor_assign(&mut self, rhs: ExprFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ExprFlags {
    type Output = ExprFlags;
    fn bitand(self, rhs: ExprFlags) -> ExprFlags {
        ExprFlags(self.0 & rhs.0)
    }
}

/// Declared type of the value a node produces. Closed domain, immutable once
/// a node is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    None,
    Scalar,
    Uint32,
    Vector2,
    Vector3,
    Vector4,
    Texture,
    Buffer,
    Mesh,
    SkinnedMesh,
    ColorGradient,
    Curve,
}

/// Which pose of a skinned mesh a sampling operation reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkinFrame {
    Current,
    Previous,
}

/// Where an attribute read resolves from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeLocation {
    /// The attribute of the element currently being processed.
    Current,
    /// The attribute of the element that spawned the current one.
    Source,
}

/// How a raw buffer is bound on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferMode {
    Structured,
    Raw,
}

/// Declared usage of a raw buffer, carried by typed-buffer wrapper nodes and
/// recorded per consumer during compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferUsage {
    pub mode: BufferMode,
    pub stride: u32,
}

/// Operation identity of a node.
///
/// The compiler only inspects identity for equality and for the closed set of
/// cases the patcher dispatches on; everything the node catalog defines beyond
/// that set travels as [`Op::External`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// A concrete leaf value.
    Value,
    /// A catalog-defined operation the compiler treats as opaque.
    External(String),

    // Consumer operations the patcher recognizes at host/device crossings.
    SampleMeshVertexFloat,
    SampleMeshVertexFloat2,
    SampleMeshVertexFloat3,
    SampleMeshVertexFloat4,
    SampleMeshVertexColor,
    SampleMeshIndex,
    SampleSkinnedMeshVertex { frame: SkinFrame },

    /// Channel format/dimension/stream descriptor consumed by mesh sampling.
    MeshChannelInfo,
    /// Typed view over a raw buffer; unwrapped by the patcher.
    BufferWithUsage(BufferUsage),
    /// Attribute read, rewritten in spawn/event compilation.
    ReadAttribute {
        name: String,
        location: AttributeLocation,
    },

    // Patch products.
    BakeGradient,
    BakeCurve,
    VertexBufferFromMesh,
    IndexBufferFromMesh,
    VertexBufferFromSkinnedMesh { frame: SkinFrame },
    ReadEventAttribute { name: String, element_offset: u32 },
}

/// One entry of the externally supplied event-attribute layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutElement {
    pub name: String,
    pub element_offset: u32,
}

/// The node-catalog contract.
///
/// Implementations are immutable value objects; `evaluate` and `reduce` must
/// not mutate `self`, only build new nodes over the parents they are given.
pub trait ExprNode {
    /// Identity of the producing computation.
    fn op(&self) -> &Op;

    /// Declared type of the produced value.
    fn value_type(&self) -> ValueType;

    /// Ordered parent references. Shared and acyclic by precondition.
    fn parents(&self) -> &[Expr];

    /// Capability flags, fixed at construction.
    fn flags(&self) -> ExprFlags;

    /// Replace the node with its concrete computed value over the given
    /// (already reduced) parents. Only called when the evaluation policy
    /// allows it.
    fn evaluate(&self, parents: &[Expr]) -> Result<Expr>;

    /// Rebuild the node over new parents without evaluating it.
    fn reduce(&self, parents: &[Expr]) -> Expr;

    /// Auxiliary code fragment carried by this node, if any.
    fn code_fragment(&self) -> Option<&str> {
        None
    }

    /// Payload access seam for node catalogs.
    fn as_any(&self) -> &dyn Any;
}

/// Identity key for an expression node.
///
/// Caches and side tables are keyed by which node a handle points at, not by
/// structural equality; two structurally identical nodes are distinct entries.
#[derive(Clone)]
pub struct ExprKey(Expr);

impl ExprKey {
    pub fn of(expr: &Expr) -> Self {
        ExprKey(Rc::clone(expr))
    }

    pub fn expr(&self) -> &Expr {
        &self.0
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for ExprKey {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ExprKey {}

impl Hash for ExprKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ExprKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExprKey({:?} @ {:#x})", self.0.op(), self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_contains_requires_all_bits() {
        let flags = ExprFlags::VALUE | ExprFlags::CONSTANT;
        assert!(flags.contains(ExprFlags::VALUE));
        assert!(flags.contains(ExprFlags::VALUE | ExprFlags::CONSTANT));
        assert!(!flags.contains(ExprFlags::VALUE | ExprFlags::FOLDABLE));
        assert!(flags.intersects(ExprFlags::FOLDABLE | ExprFlags::CONSTANT));
        assert!(!flags.intersects(ExprFlags::FOLDABLE));
    }

    #[test]
    fn event_layout_round_trips_through_json() {
        let layout = vec![
            LayoutElement {
                name: "position".into(),
                element_offset: 0,
            },
            LayoutElement {
                name: "velocity".into(),
                element_offset: 12,
            },
        ];
        let json = serde_json::to_string(&layout).unwrap();
        let back: Vec<LayoutElement> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, layout);
    }

    #[test]
    fn expr_key_is_identity_not_structure() {
        let a = nodes::mesh_channel_info(Vec::new());
        let b = nodes::mesh_channel_info(Vec::new());
        assert_eq!(ExprKey::of(&a), ExprKey::of(&a.clone()));
        assert_ne!(ExprKey::of(&a), ExprKey::of(&b));
    }
}
