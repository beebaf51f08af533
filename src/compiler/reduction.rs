//! Reduction policy: decides whether a node is evaluated to a concrete value
//! or merely rebuilt over its reduced parents.

use crate::compiler::CompileOptions;
use crate::graph::{Expr, ExprFlags, ExprNode};

/// True when `expr` should be replaced by its concrete computed value.
///
/// The gate works over a required-flag mask: the node (if it is itself a
/// value) and every reduced parent must carry every required flag and must
/// not be invalid on the host. Which flags are required depends on the
/// options: host evaluation only demands values; otherwise folding demands
/// foldable values and plain reduction demands constants.
pub(crate) fn should_evaluate(
    options: CompileOptions,
    expr: &dyn ExprNode,
    reduced_parents: &[Expr],
) -> bool {
    if !options.intersects(CompileOptions::REDUCTION_FAMILY) {
        return false;
    }

    let flags = expr.flags();
    if flags.intersects(ExprFlags::NOT_COMPILABLE_ON_HOST) {
        return false;
    }

    if !options.contains(CompileOptions::HOST_EVALUATION)
        && flags.intersects(ExprFlags::INVALID_CONSTANT)
    {
        return false;
    }

    // A derived node with no parents has nothing to evaluate from.
    if !flags.contains(ExprFlags::VALUE) && reduced_parents.is_empty() {
        return false;
    }

    let mut required = ExprFlags::VALUE;
    if !options.contains(CompileOptions::HOST_EVALUATION) {
        required |= if options.contains(CompileOptions::CONSTANT_FOLDING) {
            ExprFlags::FOLDABLE
        } else {
            ExprFlags::CONSTANT
        };
    }

    let mask = required | ExprFlags::INVALID_ON_HOST;
    if flags.contains(ExprFlags::VALUE) && flags & mask != required {
        return false;
    }

    reduced_parents
        .iter()
        .all(|parent| parent.flags() & mask == required)
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::rc::Rc;

    use super::*;
    use crate::error::{CompileError, Result};
    use crate::graph::{Op, ParentList, ValueType};

    #[derive(Clone)]
    struct Probe {
        op: Op,
        flags: ExprFlags,
        parents: ParentList,
    }

    impl Probe {
        fn leaf(flags: ExprFlags) -> Expr {
            Rc::new(Probe {
                op: Op::Value,
                flags,
                parents: ParentList::new(),
            })
        }

        fn derived(flags: ExprFlags, parents: &[Expr]) -> Expr {
            Rc::new(Probe {
                op: Op::External("probe".into()),
                flags,
                parents: parents.iter().cloned().collect(),
            })
        }
    }

    impl ExprNode for Probe {
        fn op(&self) -> &Op {
            &self.op
        }
        fn value_type(&self) -> ValueType {
            ValueType::Scalar
        }
        fn parents(&self) -> &[Expr] {
            &self.parents
        }
        fn flags(&self) -> ExprFlags {
            self.flags
        }
        fn evaluate(&self, _parents: &[Expr]) -> Result<Expr> {
            Err(CompileError::Evaluation("probe".into()))
        }
        fn reduce(&self, parents: &[Expr]) -> Expr {
            Rc::new(Probe {
                op: self.op.clone(),
                flags: self.flags,
                parents: parents.iter().cloned().collect(),
            })
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn const_value() -> ExprFlags {
        ExprFlags::VALUE | ExprFlags::CONSTANT | ExprFlags::FOLDABLE
    }

    #[test]
    fn never_evaluates_without_reduction_family_options() {
        let leaf = Probe::leaf(const_value());
        assert!(!should_evaluate(CompileOptions::NONE, leaf.as_ref(), &[]));
        assert!(!should_evaluate(
            CompileOptions::DEVICE_DATA_TRANSFORMATION,
            leaf.as_ref(),
            &[]
        ));
        assert!(should_evaluate(CompileOptions::REDUCTION, leaf.as_ref(), &[]));
    }

    #[test]
    fn host_incompatible_nodes_never_evaluate() {
        let leaf = Probe::leaf(const_value() | ExprFlags::NOT_COMPILABLE_ON_HOST);
        for options in [
            CompileOptions::REDUCTION,
            CompileOptions::HOST_EVALUATION,
            CompileOptions::CONSTANT_FOLDING,
            CompileOptions::REDUCTION | CompileOptions::CONSTANT_FOLDING,
        ] {
            assert!(!should_evaluate(options, leaf.as_ref(), &[]));
        }
    }

    #[test]
    fn invalid_constant_only_evaluates_under_host_evaluation() {
        let leaf = Probe::leaf(const_value() | ExprFlags::INVALID_CONSTANT);
        assert!(!should_evaluate(CompileOptions::REDUCTION, leaf.as_ref(), &[]));
        assert!(should_evaluate(
            CompileOptions::HOST_EVALUATION,
            leaf.as_ref(),
            &[]
        ));
    }

    #[test]
    fn derived_node_without_parents_is_not_evaluable() {
        let derived = Probe::derived(ExprFlags::NONE, &[]);
        assert!(!should_evaluate(
            CompileOptions::REDUCTION,
            derived.as_ref(),
            &[]
        ));
    }

    #[test]
    fn folding_requires_foldable_parents_reduction_requires_constant() {
        let constant_only = Probe::leaf(ExprFlags::VALUE | ExprFlags::CONSTANT);
        let derived = Probe::derived(ExprFlags::NONE, &[constant_only.clone()]);

        assert!(should_evaluate(
            CompileOptions::REDUCTION,
            derived.as_ref(),
            &[constant_only.clone()]
        ));
        // Folding demands the foldable bit, which this parent lacks.
        assert!(!should_evaluate(
            CompileOptions::REDUCTION | CompileOptions::CONSTANT_FOLDING,
            derived.as_ref(),
            &[constant_only]
        ));
    }

    #[test]
    fn invalid_on_host_blocks_node_and_parents() {
        let poisoned = Probe::leaf(const_value() | ExprFlags::INVALID_ON_HOST);
        assert!(!should_evaluate(
            CompileOptions::REDUCTION,
            poisoned.as_ref(),
            &[]
        ));

        let derived = Probe::derived(ExprFlags::NONE, &[poisoned.clone()]);
        assert!(!should_evaluate(
            CompileOptions::REDUCTION,
            derived.as_ref(),
            &[poisoned]
        ));
    }
}
