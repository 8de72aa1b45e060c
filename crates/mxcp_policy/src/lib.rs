//! Policy engine: expression-driven input gating and output redaction.
//!
//! Policies are declared per endpoint and evaluated at two stages:
//!
//! - **input**: before the runner is invoked, over `{user, input}`. The
//!   only meaningful action is `deny`.
//! - **output**: after the result is validated, over `{user, input,
//!   response}`. Matching policies compose in declared order and may
//!   remove (`filter_fields`), mask (`mask_fields`), or strip every
//!   sensitive value (`filter_sensitive_fields`) from the response.
//!
//! Conditions use a small expression language (`==`, `!=`, `&&`, `||`,
//! `!`, `in`, field and subscript access). Expressions are parsed once at
//! endpoint load time.

pub mod engine;
pub mod expr;

pub use engine::{
    apply_output, evaluate_input, InputDecision, OutputDecision, Policy, PolicyAction,
    PolicyDecision, PolicyDef, PolicyStage, MASKED,
};
pub use expr::{Bindings, Expr, ParseError};
