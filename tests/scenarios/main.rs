//! Scenario tests for full pipeline runs

mod end_to_end;
mod failure;
mod helpers;
mod selector;
