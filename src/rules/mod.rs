//! IP block rules
//!
//! [`RuleMirror`] keeps the set of blocked addresses and the engine routing
//! rules that enforce them in step.

mod mirror;

pub use mirror::{rule_id, RuleMirror};
