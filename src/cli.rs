//! CLI domain: parse, route and output only.
//! No generation logic; a single route table dispatches to the planner and renderer.

mod output;
mod parse;
mod route;

pub use output::{format_checkpoint_rows, format_plan, map_error, CheckpointRow};
pub use parse::{Cli, Commands};
pub use route::RunContext;
