//! Graph closure builder: the set of nodes live in the reduced graph.

use std::collections::HashSet;

use crate::compiler::context::{CompileContext, ConsumerId};
use crate::graph::{Expr, ExprKey};

impl<C: ConsumerId> CompileContext<C> {
    /// Collects every node reachable from the reduced form of any compiled
    /// root. Roots not compiled since the last invalidation contribute
    /// nothing.
    pub fn build_all_reduced(&self) -> HashSet<ExprKey> {
        let mut live = HashSet::new();
        for root in self.registered_expressions() {
            if let Some(reduced) = self.cached_reduced(root) {
                collect_live(&mut live, &reduced);
            }
        }
        live
    }
}

/// Depth-first descent over reduced parent chains. The visited-set guard is
/// what keeps reconvergent diamonds from being walked once per path.
fn collect_live(live: &mut HashSet<ExprKey>, expr: &Expr) {
    if live.insert(ExprKey::of(expr)) {
        for parent in expr.parents() {
            collect_live(live, parent);
        }
    }
}
