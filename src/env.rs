//! Shell-local variables, aliases and path helpers.
//!
//! Shell variables set with `set` live here and shadow the process
//! environment during `$VAR` expansion; they are never exported to
//! children. Aliases expand the first word of a line (and command heads
//! inside pipelines) exactly once.

use log::{debug, warn};
use nix::unistd::{getuid, User};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const HISTORY_FILE: &str = ".mysh_history";

#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
    aliases: HashMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a name for `$VAR` expansion: shell variables shadow the
    /// process environment.
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Remove a shell variable. Returns false when it was not set.
    pub fn unset_var(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    /// Shell variables in name order, for listing.
    pub fn vars(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<_> = self
            .vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        out.sort();
        out
    }

    pub fn set_alias(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.aliases.insert(name.into(), value.into());
    }

    /// Remove an alias. Returns false when it was not defined.
    pub fn remove_alias(&mut self, name: &str) -> bool {
        self.aliases.remove(name).is_some()
    }

    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    /// Aliases in name order, for listing.
    pub fn aliases(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<_> = self
            .aliases
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        out.sort();
        out
    }

    /// Expand an alias naming the first word of `line`, once. The remainder
    /// of the line is re-attached with a single space. Not recursive, which
    /// keeps `alias ls='ls -l'` from looping.
    pub fn expand_aliases(&self, line: &str) -> String {
        let trimmed = line.trim_start();
        let Some(first) = trimmed.split_whitespace().next() else {
            return line.to_string();
        };
        match self.aliases.get(first) {
            Some(value) => {
                let rest = trimmed[first.len()..].trim_start();
                if rest.is_empty() {
                    value.clone()
                } else {
                    format!("{} {}", value, rest)
                }
            }
            None => line.to_string(),
        }
    }

    /// Replace a leading `~` with the home directory. Only the first
    /// character is considered; everything after it is appended verbatim.
    pub fn expand_tilde(&self, path: &str) -> String {
        match path.strip_prefix('~') {
            Some(rest) => format!("{}{}", home_dir().display(), rest),
            None => path.to_string(),
        }
    }

    /// Load aliases and variables from the config file. Missing files are
    /// fine; unrecognized lines are skipped.
    pub fn load_config(&mut self, path: &Path) {
        let Ok(contents) = fs::read_to_string(path) else {
            return;
        };
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("alias ") {
                if let Some((name, value)) = rest.split_once('=') {
                    self.set_alias(name, value);
                }
            } else if let Some(rest) = line.strip_prefix("set ") {
                if let Some((name, value)) = rest.split_once('=') {
                    self.set_var(name, value);
                }
            }
        }
        debug!(
            "loaded {} aliases, {} vars from {}",
            self.aliases.len(),
            self.vars.len(),
            path.display()
        );
    }

    /// Rewrite the config file whole. Best-effort: persistence failures are
    /// never fatal.
    pub fn save_config(&self, path: &Path) {
        let mut out = String::new();
        for (name, value) in self.aliases() {
            out.push_str(&format!("alias {}={}\n", name, value));
        }
        for (name, value) in self.vars() {
            out.push_str(&format!("set {}={}\n", name, value));
        }
        if let Err(err) = fs::write(path, out) {
            warn!("could not save config to {}: {}", path.display(), err);
        }
    }
}

/// The user's home directory: `$HOME`, else the passwd entry, else `/`.
pub fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home);
    }
    match User::from_uid(getuid()) {
        Ok(Some(user)) => user.dir,
        _ => PathBuf::from("/"),
    }
}

/// Path of the persistent history file, `$HOME/.mysh_history`.
pub fn history_path() -> PathBuf {
    home_dir().join(HISTORY_FILE)
}

/// Path of the persistent alias/variable file, derived from the history
/// path by appending `_config`.
pub fn config_path() -> PathBuf {
    PathBuf::from(format!("{}_config", history_path().display()))
}
