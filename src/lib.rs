//! # fxgraph
//!
//! Expression-graph compiler for real-time effect node graphs.
//!
//! The crate turns a DAG of abstract value-producing nodes into a reduced,
//! target-ready DAG. Transformation policies are configurable per context:
//! constant folding, host-side evaluation, device-data-layout patching and
//! attribute-read rewriting. Each node is processed at most once per
//! compilation pass, and per-consumer side data (buffer-usage records,
//! auxiliary code fragments) is collected along the way with conflict
//! detection.
//!
//! ## Architecture
//!
//! - [`graph`] holds the node model: immutable, reference-counted expression
//!   nodes behind the [`ExprNode`] catalog trait, plus the built-in node set
//!   the patcher constructs.
//! - [`compiler`] holds the passes: the memoized [`CompileContext`], the
//!   reduction policy, the edge patcher and the closure builder.
//!
//! ## Example
//!
//! ```ignore
//! let mut ctx: CompileContext<UnitId> =
//!     CompileContext::new(CompileOptions::REDUCTION | CompileOptions::CONSTANT_FOLDING, None)?;
//! ctx.register(&root, unit)?;
//! ctx.compile_all_roots()?;
//! let reduced = ctx.get_reduced(&root);
//! ```

pub mod compiler;
pub mod error;
pub mod graph;

pub use compiler::{CompileContext, CompileOptions, ConsumerId};
pub use error::{CompileError, Result};
pub use graph::{
    AttributeLocation, BufferMode, BufferUsage, Expr, ExprFlags, ExprKey, ExprNode,
    LayoutElement, Op, ParentList, SkinFrame, ValueType,
};
