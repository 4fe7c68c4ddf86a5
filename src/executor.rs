//! Pipeline execution: pipes, forks, process groups, terminal ownership.
//!
//! The invariants that make job control work live here. Every pipeline
//! runs in its own process group whose pgid is the pid of the leftmost
//! child; `setpgid` is performed in both the parent and the child to close
//! the classic race between fork and exec. The terminal's foreground group
//! is handed to a foreground pipeline before waiting and returned to the
//! shell unconditionally afterwards (`SIGTTOU` is ignored shell-wide so
//! the handover itself cannot stop us).

use crate::builtin::{self, ExitCode};
use crate::env::Environment;
use crate::interpreter::Shell;
use crate::jobs::JobState;
use crate::lexer;
use crate::parser::{Command, Pipeline};
use crate::reaper;
use anyhow::Context;
use log::{debug, warn};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, execvp, fork, getpid, pipe, setpgid, tcsetpgrp, ForkResult, Pid};
use std::ffi::CString;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd};

/// Execute a parsed pipeline. `rawline` is the user's original input, kept
/// verbatim for the job table.
///
/// Returns the pipeline's exit status: the builtin's status on the
/// single-builtin fast path, 0 for background pipelines, and otherwise the
/// last status captured while reaping the group (best-effort).
pub fn run_pipeline(shell: &mut Shell, pipeline: &Pipeline, rawline: &str) -> ExitCode {
    let pipeline = expand_command_aliases(&shell.env, pipeline);
    let n = pipeline.cmds.len();
    if n == 0 {
        return 0;
    }

    // Single-builtin fast path: runs in the shell process so it can mutate
    // shell state. Anything piped, redirected or backgrounded goes through
    // fork so that file descriptors land in the child only.
    if n == 1 && !pipeline.background {
        let cmd = &pipeline.cmds[0];
        if cmd.infile.is_none() && cmd.outfile.is_none() {
            if let Some(head) = cmd.argv.first() {
                if builtin::is_builtin(head) {
                    return builtin::run_builtin(shell, &cmd.argv, &mut io::stdout());
                }
            }
        }
    }

    let mut pipes: Vec<(OwnedFd, OwnedFd)> = Vec::with_capacity(n - 1);
    for _ in 1..n {
        match pipe() {
            Ok(pair) => pipes.push(pair),
            Err(err) => {
                eprintln!("mysh: pipe: {}", err);
                return 1;
            }
        }
    }

    let mut pgid: Option<Pid> = None;
    for (i, cmd) in pipeline.cmds.iter().enumerate() {
        if cmd.argv.is_empty() {
            continue;
        }
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // The leader's own pid becomes the group; later children
                // join it. Mirrored in the parent below.
                let group = pgid.unwrap_or_else(getpid);
                let _ = setpgid(Pid::from_raw(0), group);
                if !pipeline.background {
                    // Best-effort; the parent's call is authoritative.
                    let _ = tcsetpgrp(io::stdin(), group);
                }
                reaper::reset_for_child();

                if i > 0 {
                    let _ = dup2(pipes[i - 1].0.as_raw_fd(), libc::STDIN_FILENO);
                }
                if i + 1 < n {
                    let _ = dup2(pipes[i].1.as_raw_fd(), libc::STDOUT_FILENO);
                }
                pipes.clear();

                exec_child(shell, cmd);
            }
            Ok(ForkResult::Parent { child }) => {
                let group = *pgid.get_or_insert(child);
                let _ = setpgid(child, group);
                debug!("forked {} into group {} for {:?}", child, group, cmd.argv[0]);
            }
            Err(err) => {
                eprintln!("mysh: fork: {}", err);
                return 1;
            }
        }
    }
    // The parent keeps no pipe ends: readers must see EOF once the
    // writers exit.
    drop(pipes);

    let Some(pgid) = pgid else {
        return 0;
    };

    if pipeline.background {
        if let Some(id) = shell.jobs.add(pgid, rawline, JobState::Running) {
            println!("[{}] {}", id, pgid);
        }
        return 0;
    }

    foreground_wait(shell, pgid, rawline)
}

/// Resume a stopped or backgrounded job with SIGCONT. With `foreground`
/// the job is handed the terminal and waited for until it stops again or
/// exits. Returns `None` when no job has that id.
pub fn continue_job(shell: &mut Shell, id: u32, foreground: bool) -> Option<ExitCode> {
    let pgid = {
        let job = shell.jobs.get_mut(id)?;
        job.state = JobState::Running;
        job.pgid
    };

    if !foreground {
        if let Err(err) = killpg(pgid, Signal::SIGCONT) {
            eprintln!("mysh: kill -CONT {}: {}", pgid, err);
            return Some(1);
        }
        return Some(0);
    }

    reaper::set_foreground(pgid);
    if shell.interactive {
        let _ = tcsetpgrp(io::stdin(), pgid);
    }
    if let Err(err) = killpg(pgid, Signal::SIGCONT) {
        eprintln!("mysh: kill -CONT {}: {}", pgid, err);
    }
    let (status, stopped) = wait_for_group(pgid);
    if let Some(job) = shell.jobs.get_mut(id) {
        job.state = if stopped {
            JobState::Stopped
        } else {
            JobState::Done
        };
    }
    if shell.interactive {
        let _ = tcsetpgrp(io::stdin(), shell.shell_pgid);
    }
    reaper::clear_foreground();
    Some(status)
}

fn foreground_wait(shell: &mut Shell, pgid: Pid, rawline: &str) -> ExitCode {
    reaper::set_foreground(pgid);
    if shell.interactive {
        let _ = tcsetpgrp(io::stdin(), pgid);
    }

    let (status, stopped) = wait_for_group(pgid);
    if stopped {
        if let Some(id) = shell.jobs.add(pgid, rawline, JobState::Stopped) {
            println!("[{}]  Stopped  {}", id, rawline);
        }
    }

    // Unconditionally take the terminal back before the next prompt.
    if shell.interactive {
        let _ = tcsetpgrp(io::stdin(), shell.shell_pgid);
    }
    reaper::clear_foreground();
    status
}

/// Reap the whole group with a single `WUNTRACED` loop until `ECHILD`.
/// Returns the last captured status and whether the group was stopped.
fn wait_for_group(pgid: Pid) -> (ExitCode, bool) {
    let target = Pid::from_raw(-pgid.as_raw());
    let mut status = 0;
    loop {
        match waitpid(target, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(_, code)) => status = code,
            Ok(WaitStatus::Signaled(_, signal, _)) => status = 128 + signal as i32,
            Ok(WaitStatus::Stopped(_, _)) => return (status, true),
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(err) => {
                warn!("waitpid(-{}): {}", pgid, err);
                break;
            }
        }
    }
    (status, false)
}

/// Child-side tail of fork: apply redirections, then run a builtin
/// in-process or exec the external program. Never returns.
fn exec_child(shell: &mut Shell, cmd: &Command) -> ! {
    if let Err(err) = apply_redirections(cmd) {
        eprintln!("mysh: {:#}", err);
        std::process::exit(1);
    }

    let name = &cmd.argv[0];
    if builtin::is_builtin(name) {
        let mut stdout = io::stdout();
        let code = builtin::run_builtin(shell, &cmd.argv, &mut stdout);
        let _ = stdout.flush();
        std::process::exit(code);
    }

    let Ok(program) = CString::new(name.as_str()) else {
        eprintln!("mysh: invalid command name");
        std::process::exit(1);
    };
    let args: Vec<CString> = cmd
        .argv
        .iter()
        .filter_map(|arg| CString::new(arg.as_str()).ok())
        .collect();
    let _ = execvp(&program, &args);
    eprintln!("mysh: command not found: {}", name);
    std::process::exit(127);
}

/// File redirections override pipe endpoints: they are applied after the
/// pipe `dup2`s, and the last `dup2` wins.
fn apply_redirections(cmd: &Command) -> anyhow::Result<()> {
    use std::fs::{File, OpenOptions};
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(path) = &cmd.infile {
        let file =
            File::open(path).with_context(|| format!("{}: cannot open for reading", path))?;
        dup2(file.as_raw_fd(), libc::STDIN_FILENO).context("dup2 stdin")?;
    }
    if let Some(path) = &cmd.outfile {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(cmd.append)
            .truncate(!cmd.append)
            .mode(0o644)
            .open(path)
            .with_context(|| format!("{}: cannot open for writing", path))?;
        dup2(file.as_raw_fd(), libc::STDOUT_FILENO).context("dup2 stdout")?;
    }
    Ok(())
}

/// Second-stage alias expansion: any command head inside the pipeline that
/// names an alias is re-tokenized in place. Operator tokens produced here
/// are demoted to plain words; aliases cannot restructure a pipeline.
fn expand_command_aliases(env: &Environment, pipeline: &Pipeline) -> Pipeline {
    let mut out = pipeline.clone();
    for cmd in &mut out.cmds {
        let Some(head) = cmd.argv.first() else {
            continue;
        };
        if env.alias(head).is_none() {
            continue;
        }
        let expanded = env.expand_aliases(&cmd.argv.join(" "));
        cmd.argv = lexer::split_into_tokens(&expanded, env)
            .into_iter()
            .map(|token| token.to_string())
            .collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_tokens;

    fn shell() -> Shell {
        Shell::new()
    }

    fn pipeline_of(line: &str, sh: &Shell) -> Pipeline {
        parse_tokens(lexer::split_into_tokens(line, &sh.env))
    }

    #[test]
    fn external_command_exit_status_is_reported() {
        let mut sh = shell();
        let ok = pipeline_of("true", &sh);
        assert_eq!(run_pipeline(&mut sh, &ok, "true"), 0);

        let fail = pipeline_of("false", &sh);
        assert_eq!(run_pipeline(&mut sh, &fail, "false"), 1);
    }

    #[test]
    fn pipeline_status_is_the_last_commands() {
        let mut sh = shell();
        let p = pipeline_of("sh -c exit\\ 3", &sh);
        assert_eq!(run_pipeline(&mut sh, &p, "sh -c 'exit 3'"), 3);
    }

    #[test]
    fn missing_command_yields_127() {
        let mut sh = shell();
        let p = pipeline_of("mysh-test-definitely-not-a-command", &sh);
        assert_eq!(run_pipeline(&mut sh, &p, "x"), 127);
    }

    #[test]
    fn output_redirection_writes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut sh = shell();
        let line = format!("echo a > {}", path.display());
        let p = pipeline_of(&line, &sh);
        assert_eq!(run_pipeline(&mut sh, &p, &line), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\n");
    }

    #[test]
    fn append_redirection_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut sh = shell();
        for _ in 0..2 {
            let line = format!("echo x >> {}", path.display());
            let p = pipeline_of(&line, &sh);
            run_pipeline(&mut sh, &p, &line);
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x\nx\n");
    }

    #[test]
    fn pipe_connects_adjacent_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("piped.txt");
        let mut sh = shell();
        let line = format!("echo hello | cat > {}", path.display());
        let p = pipeline_of(&line, &sh);
        assert_eq!(run_pipeline(&mut sh, &p, &line), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn input_redirection_feeds_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        std::fs::write(&src, "payload\n").unwrap();
        let mut sh = shell();
        let line = format!("cat < {} > {}", src.display(), dst.display());
        let p = pipeline_of(&line, &sh);
        assert_eq!(run_pipeline(&mut sh, &p, &line), 0);
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "payload\n");
    }

    #[test]
    fn background_pipeline_returns_immediately_and_registers_a_job() {
        let mut sh = shell();
        let line = "sleep 5 &";
        let p = pipeline_of(line, &sh);
        let started = std::time::Instant::now();
        assert_eq!(run_pipeline(&mut sh, &p, line), 0);
        assert!(started.elapsed() < std::time::Duration::from_millis(500));

        assert_eq!(sh.jobs.len(), 1);
        let job = sh.jobs.iter().next().unwrap();
        assert_eq!(job.cmdline, "sleep 5 &");
        assert_eq!(job.state, JobState::Running);

        // Don't leave the sleeper behind.
        let _ = killpg(job.pgid, Signal::SIGKILL);
        let _ = waitpid(Pid::from_raw(-job.pgid.as_raw()), None);
    }

    #[test]
    fn command_aliases_expand_inside_pipelines() {
        let mut sh = shell();
        sh.env.set_alias("hi", "echo hey");
        let p = pipeline_of("true | hi there", &sh);
        let expanded = expand_command_aliases(&sh.env, &p);
        assert_eq!(expanded.cmds[1].argv, ["echo", "hey", "there"]);
    }

    #[test]
    fn alias_operators_are_demoted_to_words() {
        let mut sh = shell();
        sh.env.set_alias("p", "ls |");
        let p = pipeline_of("p x", &sh);
        let expanded = expand_command_aliases(&sh.env, &p);
        assert_eq!(expanded.cmds[0].argv, ["ls", "|", "x"]);
    }

    #[test]
    fn continue_job_on_missing_id_is_none() {
        let mut sh = shell();
        assert!(continue_job(&mut sh, 42, true).is_none());
    }

    #[test]
    fn bg_continue_resumes_a_stopped_group() {
        let mut sh = shell();
        let line = "sleep 5 &";
        let p = pipeline_of(line, &sh);
        run_pipeline(&mut sh, &p, line);
        let (id, pgid) = {
            let job = sh.jobs.iter().next().unwrap();
            (job.id, job.pgid)
        };

        killpg(pgid, Signal::SIGSTOP).unwrap();
        sh.jobs.get_mut(id).unwrap().state = JobState::Stopped;

        assert_eq!(continue_job(&mut sh, id, false), Some(0));
        assert_eq!(sh.jobs.get(id).unwrap().state, JobState::Running);

        let _ = killpg(pgid, Signal::SIGKILL);
        let _ = waitpid(Pid::from_raw(-pgid.as_raw()), None);
    }
}
