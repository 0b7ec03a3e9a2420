//! Shared traits and helper types reused across the tickshell crates. The
//! goal is to keep the runner decoupled from how a host application reports
//! errors or lays out its search paths while still sharing common contracts.

pub mod errors;
pub mod paths;
pub mod reference;

pub use errors::{DisplayErrorFormatter, ErrorFormatter, ErrorReporter, NoopErrorReporter};
pub use paths::{
    PATH_LIST_SEPARATOR, current_path_entries, join_path_list, normalize_separators,
    split_path_list,
};
pub use reference::MemoryErrorReporter;
