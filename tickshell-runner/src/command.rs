//! Turns command strings plus [`ShellOptions`] into a single shell invocation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::encoding::OutputEncoding;
use crate::error::ShellError;

/// Shell family used to execute commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellKind {
    Unix,
    Windows,
}

impl ShellKind {
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    /// Executable launched when no override is configured.
    pub const fn default_program(self) -> &'static str {
        match self {
            Self::Unix => "sh",
            Self::Windows => "cmd.exe",
        }
    }

    /// Flag that makes the shell run the following argument as a script.
    pub const fn command_flag(self) -> &'static str {
        match self {
            Self::Unix => "-c",
            Self::Windows => "/C",
        }
    }

    /// Operator placed between two chained commands.
    pub const fn joiner(self, policy: ChainPolicy) -> &'static str {
        match (policy, self) {
            (ChainPolicy::OnSuccess, _) => "&&",
            (ChainPolicy::OnFailure, _) => "||",
            (ChainPolicy::Always, Self::Unix) => ";",
            (ChainPolicy::Always, Self::Windows) => "&",
        }
    }
}

/// When the next command of a multi-command invocation runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChainPolicy {
    /// Only after the previous command succeeded (`&&`).
    #[default]
    OnSuccess,
    /// Only after the previous command failed (`||`).
    OnFailure,
    /// Unconditionally.
    Always,
}

impl ChainPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "and" | "on-success" | "success" => Some(Self::OnSuccess),
            "or" | "on-failure" | "failure" => Some(Self::OnFailure),
            "always" | "seq" => Some(Self::Always),
            _ => None,
        }
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOptions {
    pub encoding: OutputEncoding,
    pub work_directory: PathBuf,
    /// Overrides applied on top of the inherited environment. Values may
    /// reference variables of the current process as `%NAME%` or `${NAME}`.
    pub environment_vars: BTreeMap<String, String>,
    pub chain_policy: ChainPolicy,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            encoding: OutputEncoding::system(),
            work_directory: PathBuf::from("."),
            environment_vars: BTreeMap::new(),
            chain_policy: ChainPolicy::default(),
        }
    }
}

impl ShellOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoding(mut self, encoding: OutputEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn work_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_directory = dir.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_vars.insert(key.into(), value.into());
        self
    }

    pub fn envs<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.environment_vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn chain_policy(mut self, policy: ChainPolicy) -> Self {
        self.chain_policy = policy;
        self
    }
}

/// A validated, ready-to-spawn shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub shell: ShellKind,
    pub program: String,
    pub invocation: String,
    pub work_directory: PathBuf,
    pub environment: BTreeMap<String, String>,
    pub encoding: OutputEncoding,
}

impl CommandSpec {
    /// Build for the current platform shell, expanding against the current
    /// process environment.
    pub fn build<I, S>(commands: I, options: &ShellOptions) -> Result<Self, ShellError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CommandSpecBuilder::new(ShellKind::current()).build(commands, options)
    }

    /// Arguments passed to [`CommandSpec::program`].
    pub fn args(&self) -> [&str; 2] {
        [self.shell.command_flag(), self.invocation.as_str()]
    }
}

/// Configurable construction of [`CommandSpec`] values.
pub struct CommandSpecBuilder<'a> {
    shell: ShellKind,
    program: Option<&'a str>,
    lookup: Box<dyn Fn(&str) -> Option<String> + 'a>,
}

impl<'a> CommandSpecBuilder<'a> {
    pub fn new(shell: ShellKind) -> Self {
        Self {
            shell,
            program: None,
            lookup: Box::new(|name: &str| std::env::var(name).ok()),
        }
    }

    /// Launch `program` instead of the shell family's default executable.
    pub fn program(mut self, program: Option<&'a str>) -> Self {
        self.program = program;
        self
    }

    /// Resolve `%NAME%` placeholders through `lookup` instead of the process
    /// environment.
    pub fn env_lookup(mut self, lookup: impl Fn(&str) -> Option<String> + 'a) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    pub fn build<I, S>(&self, commands: I, options: &ShellOptions) -> Result<CommandSpec, ShellError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let invocation = join_commands(self.shell, options.chain_policy, commands)?;
        ensure_directory(&options.work_directory)?;

        let environment = options
            .environment_vars
            .iter()
            .map(|(key, value)| (key.clone(), expand_env_vars_with(value, &*self.lookup)))
            .collect();

        Ok(CommandSpec {
            shell: self.shell,
            program: self
                .program
                .unwrap_or_else(|| self.shell.default_program())
                .to_string(),
            invocation,
            work_directory: options.work_directory.clone(),
            environment,
            encoding: options.encoding,
        })
    }
}

/// Join non-blank commands with the joiner for `policy`.
pub fn join_commands<I, S>(
    shell: ShellKind,
    policy: ChainPolicy,
    commands: I,
) -> Result<String, ShellError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let separator = format!(" {} ", shell.joiner(policy));
    let mut joined = String::new();
    for command in commands {
        let command = command.as_ref();
        if command.trim().is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push_str(&separator);
        }
        joined.push_str(command);
    }

    if joined.is_empty() {
        return Err(ShellError::EmptyCommandList);
    }
    Ok(joined)
}

fn ensure_directory(path: &Path) -> Result<(), ShellError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ShellError::InvalidWorkDirectory {
            path: path.to_path_buf(),
        })
    }
}

/// Expand `%NAME%` and `${NAME}` through `lookup` in a single pass, so
/// substituted values are never expanded again. Unknown names are left
/// exactly as written.
pub fn expand_env_vars_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find(['%', '$']) {
        expanded.push_str(&rest[..start]);
        let tail = &rest[start..];
        let (open, close) = if tail.starts_with("${") {
            ("${", "}")
        } else if tail.starts_with('%') {
            ("%", "%")
        } else {
            expanded.push('$');
            rest = &tail[1..];
            continue;
        };

        let after = &tail[open.len()..];
        let resolved = after
            .find(close)
            .filter(|&end| end > 0)
            .and_then(|end| lookup(&after[..end]).map(|found| (found, end)));

        match resolved {
            Some((found, end)) => {
                expanded.push_str(&found);
                rest = &after[end + close.len()..];
            }
            None => {
                expanded.push_str(open);
                rest = after;
            }
        }
    }

    expanded.push_str(rest);
    expanded
}
