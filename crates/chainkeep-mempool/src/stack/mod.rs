//! `stack_evaluator` and its subclasses: a shared depth-first walk over the pool's entry DAG,
//! specialized per concern by what `visit` does with the entry it pops.

pub mod anchor_converter;
pub mod child_closure;
pub mod conflicting_spend_remover;
pub mod evaluator;
pub mod order;
pub mod parent_closure;
pub mod priority;

pub use anchor_converter::AnchorConverter;
pub use child_closure::ChildClosureCalculator;
pub use conflicting_spend_remover::ConflictingSpendRemover;
pub use evaluator::StackEvaluator;
pub use order::TransactionOrderCalculator;
pub use parent_closure::ParentClosureCalculator;
pub use priority::PriorityCalculator;
