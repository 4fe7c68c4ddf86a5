//! Built-in commands, parsed with [`argh`] and executed in-process.
//!
//! Built-ins run directly in the shell only for a single foreground
//! command without redirections; in every other position the executor
//! forks first, so a built-in inside a pipeline sees the child's copy of
//! the shell state, exactly like an external program would.

use crate::env;
use crate::executor;
use crate::interpreter::Shell;
use anyhow::{bail, Context, Result};
use argh::{EarlyExit, FromArgs};
use std::fs::{DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::PathBuf;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure,
/// mirroring the convention of POSIX shells.
pub type ExitCode = i32;

const BUILTIN_NAMES: &[&str] = &[
    "cd",
    "exit",
    "mkdir",
    "touch",
    "clear",
    "help",
    "history",
    "histsearch",
    "jobs",
    "fg",
    "bg",
    "alias",
    "unalias",
    "set",
    "unset",
    "vars",
    "aliases",
];

/// Commands the shell implements itself rather than looking up in PATH.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// directly in the current process without spawning a child.
trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "jobs".
    fn name() -> &'static str;

    /// Executes the command against the shell state, writing regular
    /// output to `stdout`. Returns 0 on success following shell
    /// conventions.
    fn execute(self, shell: &mut Shell, stdout: &mut dyn Write) -> Result<ExitCode>;
}

/// Parse and run the named built-in. `argv[0]` must be a recognized name;
/// unknown names return 127.
pub fn run_builtin(shell: &mut Shell, argv: &[String], stdout: &mut dyn Write) -> ExitCode {
    let Some(name) = argv.first() else {
        return 0;
    };
    let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
    match name.as_str() {
        "cd" => dispatch::<Cd>(shell, &args, stdout),
        "exit" => dispatch::<Exit>(shell, &args, stdout),
        "mkdir" => dispatch::<Mkdir>(shell, &args, stdout),
        "touch" => dispatch::<Touch>(shell, &args, stdout),
        "clear" => dispatch::<Clear>(shell, &args, stdout),
        "help" => dispatch::<Help>(shell, &args, stdout),
        "history" => dispatch::<History>(shell, &args, stdout),
        "histsearch" => dispatch::<HistSearch>(shell, &args, stdout),
        "jobs" => dispatch::<Jobs>(shell, &args, stdout),
        "fg" => dispatch::<Fg>(shell, &args, stdout),
        "bg" => dispatch::<Bg>(shell, &args, stdout),
        "alias" => dispatch::<Alias>(shell, &args, stdout),
        "unalias" => dispatch::<Unalias>(shell, &args, stdout),
        "set" => dispatch::<Set>(shell, &args, stdout),
        "unset" => dispatch::<Unset>(shell, &args, stdout),
        "vars" => dispatch::<Vars>(shell, &args, stdout),
        "aliases" => dispatch::<Aliases>(shell, &args, stdout),
        _ => 127,
    }
}

fn dispatch<T: BuiltinCommand>(
    shell: &mut Shell,
    args: &[&str],
    stdout: &mut dyn Write,
) -> ExitCode {
    match T::from_args(&[T::name()], args) {
        Ok(cmd) => match cmd.execute(shell, stdout) {
            Ok(code) => code,
            Err(err) => {
                eprintln!("mysh: {}: {:#}", T::name(), err);
                1
            }
        },
        Err(EarlyExit { output, status }) => {
            if status.is_err() {
                eprintln!("{}", output.trim_end());
                1
            } else {
                let _ = writeln!(stdout, "{}", output.trim_end());
                0
            }
        }
    }
}

/// Split `NAME=VALUE` or `NAME VALUE...` argument forms shared by `alias`
/// and `set`. Extra words are joined back with single spaces.
fn split_assignment(args: &[String]) -> Option<(String, String)> {
    let first = args.first()?;
    if let Some((name, value)) = first.split_once('=') {
        if name.is_empty() {
            return None;
        }
        let mut value = value.to_string();
        if args.len() > 1 {
            if !value.is_empty() {
                value.push(' ');
            }
            value.push_str(&args[1..].join(" "));
        }
        Some((name.to_string(), value))
    } else if args.len() >= 2 {
        Some((first.clone(), args[1..].join(" ")))
    } else {
        None
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// Defaults to $HOME when no target is given; a leading ~ expands to $HOME.
struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory
    target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, shell: &mut Shell, _stdout: &mut dyn Write) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(shell.env.expand_tilde(t)),
            _ => env::home_dir(),
        };
        std::env::set_current_dir(&target)
            .with_context(|| format!("cannot cd to {}", target.display()))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Persist history and config, then terminate the shell.
struct Exit {
    #[argh(positional, greedy)]
    /// ignored; the shell always exits with status 0
    _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, shell: &mut Shell, _stdout: &mut dyn Write) -> Result<ExitCode> {
        shell.save_state();
        std::process::exit(0)
    }
}

#[derive(FromArgs)]
/// Create directories with mode 0755.
struct Mkdir {
    #[argh(positional, greedy)]
    /// directories to create
    paths: Vec<String>,
}

impl BuiltinCommand for Mkdir {
    fn name() -> &'static str {
        "mkdir"
    }

    fn execute(self, _shell: &mut Shell, _stdout: &mut dyn Write) -> Result<ExitCode> {
        if self.paths.is_empty() {
            bail!("missing operand");
        }
        for path in &self.paths {
            if let Err(err) = DirBuilder::new().mode(0o755).create(path) {
                eprintln!("mysh: mkdir: {}: {}", path, err);
            }
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Create empty files (mode 0644) if they do not exist.
struct Touch {
    #[argh(positional, greedy)]
    /// files to create
    paths: Vec<String>,
}

impl BuiltinCommand for Touch {
    fn name() -> &'static str {
        "touch"
    }

    fn execute(self, _shell: &mut Shell, _stdout: &mut dyn Write) -> Result<ExitCode> {
        if self.paths.is_empty() {
            bail!("missing file operand");
        }
        for path in &self.paths {
            let opened = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .mode(0o644)
                .open(path);
            if let Err(err) = opened {
                eprintln!("mysh: touch: {}: {}", path, err);
            }
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Clear the terminal display.
struct Clear {}

impl BuiltinCommand for Clear {
    fn name() -> &'static str {
        "clear"
    }

    fn execute(self, _shell: &mut Shell, stdout: &mut dyn Write) -> Result<ExitCode> {
        write!(stdout, "\x1b[H\x1b[2J")?;
        stdout.flush()?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List the shell's built-in commands.
struct Help {}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn execute(self, _shell: &mut Shell, stdout: &mut dyn Write) -> Result<ExitCode> {
        writeln!(stdout, "mysh built-ins:")?;
        writeln!(stdout, "  cd [dir]            change directory (~ expands to $HOME)")?;
        writeln!(stdout, "  exit                save state and leave the shell")?;
        writeln!(stdout, "  mkdir/touch PATHS   create directories/files")?;
        writeln!(stdout, "  clear               clear the screen")?;
        writeln!(stdout, "  history             list recent commands; !N re-runs entry N")?;
        writeln!(stdout, "  histsearch TERM     search the history")?;
        writeln!(stdout, "  jobs / fg ID / bg ID  manage background jobs")?;
        writeln!(stdout, "  alias / unalias     manage command shortcuts")?;
        writeln!(stdout, "  set / unset         manage shell variables ($VAR expands)")?;
        writeln!(stdout, "  vars / aliases      list the tables")?;
        writeln!(stdout, "append ? to a line to preview its tokens without running it")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the command history with 1-based indices.
struct History {}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn execute(self, shell: &mut Shell, stdout: &mut dyn Write) -> Result<ExitCode> {
        for (index, line) in shell.history.iter() {
            writeln!(stdout, "{:5}  {}", index, line)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print history entries containing a term.
struct HistSearch {
    #[argh(positional)]
    /// substring to look for
    term: String,
}

impl BuiltinCommand for HistSearch {
    fn name() -> &'static str {
        "histsearch"
    }

    fn execute(self, shell: &mut Shell, stdout: &mut dyn Write) -> Result<ExitCode> {
        for (index, line) in shell.history.search(&self.term) {
            writeln!(stdout, "{:5}  {}", index, line)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the job table, then forget finished jobs.
struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(self, shell: &mut Shell, stdout: &mut dyn Write) -> Result<ExitCode> {
        for job in shell.jobs.iter() {
            writeln!(
                stdout,
                "[{}]  {:<8} {}",
                job.id,
                job.state.to_string(),
                job.cmdline
            )?;
        }
        shell.jobs.remove_done();
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Bring a job to the foreground and wait for it.
struct Fg {
    #[argh(positional)]
    /// job id as shown by `jobs`
    id: u32,
}

impl BuiltinCommand for Fg {
    fn name() -> &'static str {
        "fg"
    }

    fn execute(self, shell: &mut Shell, _stdout: &mut dyn Write) -> Result<ExitCode> {
        match executor::continue_job(shell, self.id, true) {
            Some(_) => Ok(0),
            None => bail!("no such job: {}", self.id),
        }
    }
}

#[derive(FromArgs)]
/// Resume a stopped job in the background.
struct Bg {
    #[argh(positional)]
    /// job id as shown by `jobs`
    id: u32,
}

impl BuiltinCommand for Bg {
    fn name() -> &'static str {
        "bg"
    }

    fn execute(self, shell: &mut Shell, _stdout: &mut dyn Write) -> Result<ExitCode> {
        match executor::continue_job(shell, self.id, false) {
            Some(code) => Ok(code),
            None => bail!("no such job: {}", self.id),
        }
    }
}

#[derive(FromArgs)]
/// Define an alias, or list all aliases when called without arguments.
/// Accepts both `alias NAME=VALUE` and `alias NAME VALUE...`.
struct Alias {
    #[argh(positional, greedy)]
    /// NAME=VALUE, or NAME followed by the value words
    args: Vec<String>,
}

impl BuiltinCommand for Alias {
    fn name() -> &'static str {
        "alias"
    }

    fn execute(self, shell: &mut Shell, stdout: &mut dyn Write) -> Result<ExitCode> {
        if self.args.is_empty() {
            for (name, value) in shell.env.aliases() {
                writeln!(stdout, "{}='{}'", name, value)?;
            }
            return Ok(0);
        }
        let Some((name, value)) = split_assignment(&self.args) else {
            bail!("usage: alias NAME=VALUE | alias NAME VALUE...");
        };
        shell.env.set_alias(name, value);
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Remove an alias.
struct Unalias {
    #[argh(positional)]
    /// alias name to remove
    name: String,
}

impl BuiltinCommand for Unalias {
    fn name() -> &'static str {
        "unalias"
    }

    fn execute(self, shell: &mut Shell, _stdout: &mut dyn Write) -> Result<ExitCode> {
        if !shell.env.remove_alias(&self.name) {
            bail!("{}: not found", self.name);
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Set a shell variable. Accepts `set NAME=VALUE` and `set NAME VALUE`.
/// Shell variables shadow the process environment during $VAR expansion
/// and are not exported to children.
struct Set {
    #[argh(positional, greedy)]
    /// NAME=VALUE, or NAME followed by the value words
    args: Vec<String>,
}

impl BuiltinCommand for Set {
    fn name() -> &'static str {
        "set"
    }

    fn execute(self, shell: &mut Shell, _stdout: &mut dyn Write) -> Result<ExitCode> {
        let Some((name, value)) = split_assignment(&self.args) else {
            bail!("usage: set NAME=VALUE | set NAME VALUE");
        };
        shell.env.set_var(name, value);
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Remove a shell variable.
struct Unset {
    #[argh(positional)]
    /// variable name to remove
    name: String,
}

impl BuiltinCommand for Unset {
    fn name() -> &'static str {
        "unset"
    }

    fn execute(self, shell: &mut Shell, _stdout: &mut dyn Write) -> Result<ExitCode> {
        if !shell.env.unset_var(&self.name) {
            bail!("{}: not found", self.name);
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List shell variables.
struct Vars {}

impl BuiltinCommand for Vars {
    fn name() -> &'static str {
        "vars"
    }

    fn execute(self, shell: &mut Shell, stdout: &mut dyn Write) -> Result<ExitCode> {
        for (name, value) in shell.env.vars() {
            writeln!(stdout, "{}={}", name, value)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List aliases.
struct Aliases {}

impl BuiltinCommand for Aliases {
    fn name() -> &'static str {
        "aliases"
    }

    fn execute(self, shell: &mut Shell, stdout: &mut dyn Write) -> Result<ExitCode> {
        for (name, value) in shell.env.aliases() {
            writeln!(stdout, "{}='{}'", name, value)?;
        }
        Ok(0)
    }
}
