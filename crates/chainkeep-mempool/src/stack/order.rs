//! `TransactionOrderCalculator`: a topological sort restricted to a working set of entries (e.g.
//! the current block template), so every non-anchor parent lands before its children.

use std::collections::{HashMap, HashSet};

use crate::entry::{EntryId, TransactionEntry};
use crate::stack::evaluator::StackEvaluator;

pub struct TransactionOrderCalculator<'a> {
    entries: &'a HashMap<EntryId, TransactionEntry>,
    working_set: &'a HashSet<EntryId>,
    encountered: HashSet<EntryId>,
    order: Vec<EntryId>,
}

impl<'a> TransactionOrderCalculator<'a> {
    pub fn new(entries: &'a HashMap<EntryId, TransactionEntry>, working_set: &'a HashSet<EntryId>) -> Self {
        Self {
            entries,
            working_set,
            encountered: HashSet::new(),
            order: Vec::new(),
        }
    }

    /// Orders every id in `ids`, parents before children. Ids outside the working set (already
    /// confirmed, or not part of this template) are treated as satisfied.
    pub fn order(mut self, ids: &[EntryId]) -> Vec<EntryId> {
        for &id in ids {
            if !self.encountered.contains(&id) {
                self.evaluate(id);
            }
        }
        self.order
    }
}

impl<'a> StackEvaluator for TransactionOrderCalculator<'a> {
    fn encountered_mut(&mut self) -> &mut HashSet<EntryId> {
        &mut self.encountered
    }

    fn visit(&mut self, entry: EntryId, stack: &mut Vec<EntryId>) -> bool {
        let Some(e) = self.entries.get(&entry) else {
            return true;
        };
        let pending_parents: Vec<EntryId> = e
            .parents
            .iter()
            .copied()
            .filter(|p| self.working_set.contains(p) && !self.encountered.contains(p))
            .collect();

        if e.is_anchor() || pending_parents.is_empty() {
            self.order.push(entry);
            return true;
        }

        stack.push(entry);
        for parent in pending_parents {
            stack.push(parent);
        }
        false
    }
}
