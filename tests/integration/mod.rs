//! Integration tests for Storyloom

mod beam_search;
mod checkpoint;
mod config_integration;
mod expansion;
mod outline_tree;
mod plan_roundtrip;
mod test_utils;
