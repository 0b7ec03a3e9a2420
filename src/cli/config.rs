use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::config::LoadedConfig;

/// Print the effective configuration, noting where it was loaded from.
pub fn handle_config_command(loaded: &LoadedConfig) -> Result<()> {
    let rendered = loaded.config.to_toml_string()?;
    let source = match &loaded.path {
        Some(path) => format!("# loaded from {}", path.display()),
        None => "# built-in defaults".to_string(),
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{source}")
        .and_then(|()| write!(stdout, "{rendered}"))
        .context("failed to write configuration")
}
