//! Match expressions used to scope manifest rules.
//!
//! - [`MatchValue`]: atomic comparison over one property value
//! - [`MatchNode`]: boolean tree over a whole event
//! - [`validate_tree`]: self-then-descendants validation shared with actions

pub mod node;
pub mod validate;
pub mod value;

pub use node::MatchNode;
pub use validate::{validate_tree, Validatable};
pub use value::MatchValue;
