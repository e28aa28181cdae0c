//! A3S Pack CLI - builder assembly and rebase from the command line.

pub mod commands;
pub mod logging;
pub mod output;
