//! Compilation context: root registration, the memoized reduction pass,
//! invalidation and the per-consumer aggregates.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use tracing::{debug, debug_span, trace};

use crate::compiler::reduction::should_evaluate;
use crate::compiler::{CollectedData, CompileOptions};
use crate::error::{CompileError, Result};
use crate::graph::{BufferUsage, Expr, ExprFlags, ExprKey, LayoutElement, ParentList};

/// Identity on whose behalf roots are compiled. Any hashable, comparable
/// value the caller supplies works; aggregates are partitioned by it.
pub trait ConsumerId: Clone + Eq + Hash + fmt::Debug {}

impl<T: Clone + Eq + Hash + fmt::Debug> ConsumerId for T {}

/// Orchestrates compilation of registered root expressions.
///
/// The context owns the memoization cache and the per-consumer aggregates;
/// expressions themselves are shared immutable values it merely borrows.
/// Option set and event-attribute layout are fixed for the context's life.
///
/// Single-writer discipline: callers must not invoke `compile_all_roots`,
/// `invalidate` or `invalidate_node` concurrently on the same context.
pub struct CompileContext<C: ConsumerId> {
    options: CompileOptions,
    event_layout: Option<Vec<LayoutElement>>,

    roots: HashMap<ExprKey, HashSet<C>>,
    reduced: HashMap<ExprKey, Expr>,

    buffer_usage_per_consumer: HashMap<C, HashMap<ExprKey, BufferUsage>>,
    code_fragments_per_consumer: HashMap<C, Vec<Expr>>,
    // Cross-consumer view of buffer usages, so two consumers disagreeing on a
    // shared raw buffer fail the pass even though their aggregates are
    // separate maps.
    global_buffer_usage: HashMap<ExprKey, BufferUsage>,
}

impl<C: ConsumerId> CompileContext<C> {
    /// Creates a context with a fixed option set and, for spawn/event
    /// compilation, the externally resolved event-attribute layout.
    pub fn new(
        options: CompileOptions,
        event_layout: Option<Vec<LayoutElement>>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(CompileContext {
            options,
            event_layout,
            roots: HashMap::new(),
            reduced: HashMap::new(),
            buffer_usage_per_consumer: HashMap::new(),
            code_fragments_per_consumer: HashMap::new(),
            global_buffer_usage: HashMap::new(),
        })
    }

    pub fn options(&self) -> CompileOptions {
        self.options
    }

    pub(crate) fn event_layout(&self) -> Option<&[LayoutElement]> {
        self.event_layout.as_deref()
    }

    /// Registers a root expression on behalf of a consumer. Registering the
    /// same (root, consumer) pair twice is an error.
    pub fn register(&mut self, root: &Expr, consumer: C) -> Result<()> {
        let consumers = self.roots.entry(ExprKey::of(root)).or_default();
        if !consumers.insert(consumer) {
            return Err(CompileError::DuplicateRegistration);
        }
        Ok(())
    }

    /// Removes a root and drops its cache entry.
    pub fn unregister(&mut self, root: &Expr) {
        self.invalidate_node(root);
        self.roots.remove(&ExprKey::of(root));
    }

    /// All currently registered roots.
    pub fn registered_expressions(&self) -> impl Iterator<Item = &Expr> {
        self.roots.keys().map(ExprKey::expr)
    }

    /// Compiles every registered root, then flushes the side data gathered
    /// during each root's traversal into the aggregates of every consumer
    /// registered for that root.
    pub fn compile_all_roots(&mut self) -> Result<()> {
        let _span = debug_span!("compile_pass", roots = self.roots.len()).entered();

        let needs_patch = self.options.intersects(
            CompileOptions::DEVICE_DATA_TRANSFORMATION | CompileOptions::PATCH_ATTRIBUTE_READS,
        );
        let device_transform =
            needs_patch && self.options.contains(CompileOptions::DEVICE_DATA_TRANSFORMATION);
        let patch_attribute_reads =
            needs_patch && self.options.contains(CompileOptions::PATCH_ATTRIBUTE_READS);

        let roots: Vec<(Expr, Vec<C>)> = self
            .roots
            .iter()
            .map(|(key, consumers)| (key.expr().clone(), consumers.iter().cloned().collect()))
            .collect();

        let mut collected = CollectedData::default();
        for (root, consumers) in roots {
            self.compile_with(&root, &mut collected)?;

            if needs_patch {
                // The root's final value crosses to the target with no
                // specific consuming node.
                let reduced = self.get_reduced(&root);
                let patched = self.patch_expression(
                    reduced,
                    None,
                    device_transform,
                    patch_attribute_reads,
                    &mut collected,
                )?;
                self.reduced.insert(ExprKey::of(&root), patched);
            }

            self.flush_collected(&collected, &consumers)?;
            collected.clear();

            debug!(root = ?ExprKey::of(&root), consumers = consumers.len(), "compiled root");
        }

        Ok(())
    }

    /// Invalidate everything, then compile every registered root again.
    pub fn recompile(&mut self) -> Result<()> {
        self.invalidate();
        self.compile_all_roots()
    }

    /// Compiles a single expression through the shared cache. Side data
    /// gathered by this call is discarded; divergence checking within the
    /// call still applies.
    pub fn compile(&mut self, expr: &Expr) -> Result<Expr> {
        let mut collected = CollectedData::default();
        self.compile_with(expr, &mut collected)
    }

    /// Memoized recursive reduction, parents before children. Re-entrant
    /// calls for a node already processed in this pass hit the cache, so a
    /// node shared across many paths of the DAG is processed exactly once.
    pub(crate) fn compile_with(
        &mut self,
        expr: &Expr,
        collected: &mut CollectedData,
    ) -> Result<Expr> {
        let key = ExprKey::of(expr);
        if let Some(reduced) = self.reduced.get(&key) {
            return Ok(reduced.clone());
        }

        let device_transform = self
            .options
            .contains(CompileOptions::DEVICE_DATA_TRANSFORMATION);
        let patch_attribute_reads = self.options.contains(CompileOptions::PATCH_ATTRIBUTE_READS);

        let source_parents: ParentList = expr.parents().iter().cloned().collect();
        let mut parents = ParentList::with_capacity(source_parents.len());
        for parent in &source_parents {
            let compiled = self.compile_with(parent, collected)?;
            // A host/device crossing edge: the consuming node is device-only
            // while the parent it consumes is still host-compatible.
            let crossing = device_transform
                && expr.flags().intersects(ExprFlags::NOT_COMPILABLE_ON_HOST)
                && !compiled
                    .flags()
                    .intersects(ExprFlags::NOT_COMPILABLE_ON_HOST);
            let patched = self.patch_expression(
                compiled,
                Some(expr),
                crossing,
                patch_attribute_reads,
                collected,
            )?;
            parents.push(patched);
        }

        let reduced = if should_evaluate(self.options, expr.as_ref(), &parents) {
            expr.evaluate(&parents)?
        } else if self.options.intersects(CompileOptions::REDUCTION_FAMILY)
            || !same_parents(&parents, expr.parents())
        {
            expr.reduce(&parents)
        } else {
            // Nothing changed and no reduction semantics requested: hand the
            // original back without allocating.
            Rc::clone(expr)
        };

        if expr.code_fragment().is_some() {
            collected.add_fragment(expr);
        }

        trace!(op = ?expr.op(), "reduced expression");
        self.reduced.insert(key, reduced.clone());
        Ok(reduced)
    }

    /// Clears the reduction cache and every aggregate.
    pub fn invalidate(&mut self) {
        self.reduced.clear();
        self.buffer_usage_per_consumer.clear();
        self.code_fragments_per_consumer.clear();
        self.global_buffer_usage.clear();
    }

    /// Drops a single node's cache entry, for targeted recompilation after
    /// one node's definition changes.
    pub fn invalidate_node(&mut self, expr: &Expr) {
        self.reduced.remove(&ExprKey::of(expr));
    }

    /// The reduced form of `expr`, or `expr` itself when it has not been
    /// compiled; absence is not an error.
    pub fn get_reduced(&self, expr: &Expr) -> Expr {
        self.cached_reduced(expr).unwrap_or_else(|| Rc::clone(expr))
    }

    /// The cached reduced form, if this node was compiled since the last
    /// invalidation.
    pub fn cached_reduced(&self, expr: &Expr) -> Option<Expr> {
        self.reduced.get(&ExprKey::of(expr)).cloned()
    }

    /// Buffer usages recorded while compiling this consumer's roots.
    pub fn buffer_usages_for(&self, consumer: &C) -> Option<&HashMap<ExprKey, BufferUsage>> {
        self.buffer_usage_per_consumer.get(consumer)
    }

    /// Code-fragment holders encountered while compiling this consumer's
    /// roots, in traversal order.
    pub fn code_fragments_for(&self, consumer: &C) -> &[Expr] {
        self.code_fragments_per_consumer
            .get(consumer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn flush_collected(&mut self, collected: &CollectedData, consumers: &[C]) -> Result<()> {
        if !collected.buffer_usages.is_empty() {
            for (raw, usage) in &collected.buffer_usages {
                match self.global_buffer_usage.entry(raw.clone()) {
                    Entry::Vacant(entry) => {
                        entry.insert(*usage);
                    }
                    Entry::Occupied(entry) if *entry.get() == *usage => {}
                    Entry::Occupied(entry) => {
                        return Err(CompileError::DivergingBufferUsage {
                            first: *entry.get(),
                            second: *usage,
                        });
                    }
                }
            }
            for consumer in consumers {
                let usages = self
                    .buffer_usage_per_consumer
                    .entry(consumer.clone())
                    .or_default();
                for (raw, usage) in &collected.buffer_usages {
                    usages.insert(raw.clone(), *usage);
                }
            }
        }

        if !collected.code_fragments.is_empty() {
            for consumer in consumers {
                self.code_fragments_per_consumer
                    .entry(consumer.clone())
                    .or_default()
                    .extend(collected.code_fragments.iter().cloned());
            }
        }

        Ok(())
    }
}

/// Referential comparison of the compiled parent list against the original.
/// Cheap and observably equivalent to a structural comparison given the
/// memoization invariants.
fn same_parents(compiled: &[Expr], source: &[Expr]) -> bool {
    compiled.len() == source.len()
        && compiled
            .iter()
            .zip(source)
            .all(|(a, b)| Rc::ptr_eq(a, b))
}
