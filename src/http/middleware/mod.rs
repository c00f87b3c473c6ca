//! Request middleware.
//!
//! - assignment.rs: experiment bucketing, sticky cookies and the routing rewrite

pub mod assignment;

pub use assignment::{assignment_middleware, AssignmentContext, AssignmentState, RoutingRule};
