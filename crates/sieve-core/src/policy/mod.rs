//! Access policies.
//!
//! A [`Policy`] is a labeled, versioned list of [`Rule`]s. Each rule allows
//! or denies an action on a [`Target`], optionally restricted to fields or
//! to rows matching equality maps, and allow rules may attach
//! [`TransformationSpec`]s that rewrite field values on the wire.
//!
//! # YAML form
//!
//! ```yaml
//! label: card-analytics
//! version: 1
//! created_at: 2024-01-01T00:00:00Z
//! updated_at: 2024-01-01T00:00:00Z
//! rules:
//!   - target: records:c.transactions
//!     action: read
//!     effect: allow
//!     fields: [card_number, processor]
//!     transformations:
//!       - field: card_number
//!         function: tokenization
//!         args: { maxSize: 16 }
//!   - target: records:c.transactions
//!     action: read
//!     effect: deny
//!     where:
//!       - vendor: acme
//! ```

pub mod document;
pub mod evaluator;
pub mod rule;
pub mod target;

pub use document::{load_policies, load_policy_path, Policy};
pub use evaluator::{Evaluation, PolicyEvaluator};
pub use rule::{Action, Effect, Rule, Scalar, TransformationSpec};
pub use target::Target;
