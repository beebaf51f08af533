//! # Expression Graph Compiler
//!
//! Turns a DAG of expression nodes into a reduced, target-ready DAG.
//!
//! ## Compilation pipeline
//!
//! 1. **Registration**: callers register root expressions, each on behalf of
//!    an identifying consumer.
//! 2. **Memoized reduction**: each root is compiled by a recursive,
//!    parent-first traversal; every node is processed at most once per pass.
//! 3. **Edge patching**: as a compiled parent is handed to its consuming
//!    node, the patcher may rewrite it (host/device crossing, typed-buffer
//!    unwrapping, attribute-read rewriting).
//! 4. **Aggregation**: buffer usages and code fragments collected during a
//!    root's traversal are flushed into per-consumer aggregates, with
//!    divergence detection for conflicting buffer usages.
//!
//! The pass is single-threaded and synchronous; the context assumes exclusive
//! access while compiling.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::BitOr;
use std::rc::Rc;

use crate::error::{CompileError, Result};
use crate::graph::{BufferUsage, Expr, ExprKey};

pub mod closure;
pub mod context;
mod patcher;
mod reduction;


pub use context::{CompileContext, ConsumerId};

/// Transformation policies for one compilation context, fixed for its whole
/// life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileOptions(u8);

impl CompileOptions {
    pub const NONE: CompileOptions = CompileOptions(0);
    /// Rebuild nodes over their reduced parents.
    pub const REDUCTION: CompileOptions = CompileOptions(1 << 0);
    /// Evaluate everything host-computable to concrete values.
    pub const HOST_EVALUATION: CompileOptions = CompileOptions(1 << 1);
    /// Evaluate foldable constant subgraphs to concrete values.
    pub const CONSTANT_FOLDING: CompileOptions = CompileOptions(1 << 2);
    /// Rewrite host data into device layouts at host/device crossings.
    pub const DEVICE_DATA_TRANSFORMATION: CompileOptions = CompileOptions(1 << 3);
    /// Rewrite current-frame attribute reads against the event layout.
    pub const PATCH_ATTRIBUTE_READS: CompileOptions = CompileOptions(1 << 4);

    /// The options under which nodes are evaluated or rebuilt at all.
    pub(crate) const REDUCTION_FAMILY: CompileOptions = CompileOptions(
        Self::REDUCTION.0 | Self::HOST_EVALUATION.0 | Self::CONSTANT_FOLDING.0,
    );

    pub fn contains(self, other: CompileOptions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: CompileOptions) -> bool {
        self.0 & other.0 != 0
    }

    /// Host evaluation produces host values; device transformation replaces
    /// them with device forms. Requesting both is a configuration error.
    pub(crate) fn validate(self) -> Result<()> {
        if self.contains(Self::HOST_EVALUATION | Self::DEVICE_DATA_TRANSFORMATION) {
            return Err(CompileError::InvalidOptions);
        }
        Ok(())
    }
}

impl BitOr for CompileOptions {
    type Output = CompileOptions;
    fn bitor(self, rhs: CompileOptions) -> CompileOptions {
        CompileOptions(self.0 | rhs.0)
    }
}

/// Side data gathered while compiling a single root, flushed into per-consumer
/// aggregates and cleared before the next root.
#[derive(Default)]
pub(crate) struct CollectedData {
    pub(crate) buffer_usages: HashMap<ExprKey, BufferUsage>,
    pub(crate) code_fragments: Vec<Expr>,
}

impl CollectedData {
    /// Records the declared usage of a raw buffer node. Two paths within one
    /// root disagreeing on the usage is a fatal divergence.
    pub(crate) fn record_buffer_usage(&mut self, raw: ExprKey, usage: BufferUsage) -> Result<()> {
        match self.buffer_usages.entry(raw) {
            Entry::Vacant(entry) => {
                entry.insert(usage);
                Ok(())
            }
            Entry::Occupied(entry) if *entry.get() == usage => Ok(()),
            Entry::Occupied(entry) => Err(CompileError::DivergingBufferUsage {
                first: *entry.get(),
                second: usage,
            }),
        }
    }

    /// Appends a code-fragment holder, once per distinct node.
    pub(crate) fn add_fragment(&mut self, holder: &Expr) {
        if !self.code_fragments.iter().any(|f| Rc::ptr_eq(f, holder)) {
            self.code_fragments.push(Rc::clone(holder));
        }
    }

    pub(crate) fn clear(&mut self) {
        self.buffer_usages.clear();
        self.code_fragments.clear();
    }
}
