use std::borrow::Cow;

use tracing::debug;

/// Separator between entries of a search-path list such as `PATH`.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';

/// Separator between entries of a search-path list such as `PATH`.
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// Join entries into a single search-path list using the platform separator.
pub fn join_path_list<S: AsRef<str>>(entries: &[S]) -> String {
    let mut joined = String::new();
    for (index, entry) in entries.iter().enumerate() {
        if index > 0 {
            joined.push(PATH_LIST_SEPARATOR);
        }
        joined.push_str(entry.as_ref());
    }
    joined
}

/// Split a search-path list on the platform separator.
///
/// Empty segments are kept so the round trip through [`join_path_list`] is
/// lossless.
pub fn split_path_list(list: &str) -> Vec<String> {
    list.split(PATH_LIST_SEPARATOR).map(str::to_owned).collect()
}

/// Entries of the current process's `PATH`, or nothing when it is unset.
pub fn current_path_entries() -> Vec<String> {
    match std::env::var("PATH") {
        Ok(path) => split_path_list(&path),
        Err(error) => {
            debug!(%error, "PATH is not available; using an empty search path");
            Vec::new()
        }
    }
}

/// Rewrite backslash separators as forward slashes.
///
/// Borrows when the text has nothing to rewrite, which is the common case
/// for output lines on Unix hosts.
pub fn normalize_separators(text: &str) -> Cow<'_, str> {
    if text.contains('\\') {
        Cow::Owned(text.replace('\\', "/"))
    } else {
        Cow::Borrowed(text)
    }
}
