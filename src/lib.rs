//! A build graph executor: runs build commands in dependency order, learns
//! extra dependencies from compiler-written depfiles, and moves overlong
//! command lines into response files.

pub mod canon;
pub mod db;
pub mod densemap;
pub mod depfile;
mod error;
pub mod eval;
pub mod fs;
pub mod graph;
pub mod hash;
pub mod load;
pub mod process;
#[cfg(unix)]
mod process_posix;
pub mod progress;
pub mod rspfile;
pub mod scanner;
pub mod smallmap;
pub mod task;
pub mod trace;
pub mod work;

pub use error::{Error, ExecutionFailure, Result};
