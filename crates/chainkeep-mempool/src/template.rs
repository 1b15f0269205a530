//! Block template assembly: greedily admits pool roots by descending priority until the byte or
//! sigop budget is exhausted, then orders the selection so every entry follows its parents.

use std::collections::HashSet;

use tracing::debug;

use crate::entry::EntryId;
use crate::stack::order::TransactionOrderCalculator;
use crate::state::TransactionPoolState;

/// Rebuilds `state`'s template from scratch: clears any previous selection, then walks
/// [`TransactionPoolState::pool_roots_by_priority_desc`], admitting each root's whole
/// closure when it still fits the remaining budget. Returns the selection in mining order
/// (parents first).
pub fn assemble(state: &mut TransactionPoolState) -> Vec<EntryId> {
    for id in state.template_ids() {
        state.remove_from_template(id);
    }

    for root in state.pool_roots_by_priority_desc() {
        if state.in_template(root) {
            continue;
        }
        let mut closure = state.child_closure(root);
        closure.retain(|id| !state.in_template(*id));
        closure.push(root);

        let (bytes, sigops) = state.closure_cost(&closure);
        if bytes > state.template_remaining_bytes() || sigops > state.template_remaining_sigops() {
            continue;
        }
        for &id in &closure {
            state.add_to_template(id);
        }
    }

    let working_set: HashSet<EntryId> = state.template_ids().into_iter().collect();
    let order = TransactionOrderCalculator::new(state.entries(), &working_set)
        .order(&working_set.iter().copied().collect::<Vec<_>>());
    debug!(
        entries = order.len(),
        bytes_remaining = state.template_remaining_bytes(),
        "assembled block template"
    );
    order
}
