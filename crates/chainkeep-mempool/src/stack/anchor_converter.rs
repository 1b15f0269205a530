//! `AnchorConverter`: demotes template entries whose priority has fallen below a bound (e.g.
//! after a higher-priority root displaced them) back to plain pool membership, freeing their
//! budget share for reassembly.

use crate::entry::EntryId;
use crate::state::TransactionPoolState;

pub struct AnchorConverter<'a> {
    state: &'a mut TransactionPoolState,
}

impl<'a> AnchorConverter<'a> {
    pub fn new(state: &'a mut TransactionPoolState) -> Self {
        Self { state }
    }

    /// Demotes every template entry priced below `min_priority`. Returns the demoted ids.
    pub fn convert(self, min_priority: u64) -> Vec<EntryId> {
        let demoted = self.state.template_entries_below(min_priority);
        for &id in &demoted {
            self.state.remove_from_template(id);
        }
        demoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    #[test]
    fn convert_demotes_only_entries_below_the_bound() {
        let mut state = TransactionPoolState::new(1_000_000, 80_000, 0, 0);
        let a = genesis_block(Network::Bitcoin).txdata[0].clone();
        let a_id = state.insert(a, 1000).unwrap();
        state.add_to_template(a_id);

        let priority = state.priority_of(a_id).unwrap();
        let demoted = AnchorConverter::new(&mut state).convert(priority + 1);

        assert_eq!(demoted, vec![a_id]);
        assert!(!state.in_template(a_id));
    }

    #[test]
    fn convert_leaves_high_priority_entries_templated() {
        let mut state = TransactionPoolState::new(1_000_000, 80_000, 0, 0);
        let a = genesis_block(Network::Bitcoin).txdata[0].clone();
        let a_id = state.insert(a, 1000).unwrap();
        state.add_to_template(a_id);

        let demoted = AnchorConverter::new(&mut state).convert(0);

        assert!(demoted.is_empty());
        assert!(state.in_template(a_id));
    }
}
