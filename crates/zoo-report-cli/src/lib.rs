//! `zoo-report` command-line front end.

mod cli;

pub use cli::{exit_code, init_tracing, run, run_with, Args};
