#![allow(clippy::too_many_arguments, clippy::float_cmp, clippy::needless_range_loop,
         clippy::manual_range_contains, clippy::collapsible_else_if)]

pub mod q_shared;
pub mod qfiles;
pub mod common;
pub mod cvar;
