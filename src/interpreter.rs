//! The interactive read-eval loop and the shell's owned state.
//!
//! All mutable tables (variables, aliases, jobs, history) hang off a
//! single [`Shell`] value threaded through the executor and the built-in
//! dispatcher. The SIGCHLD reaper communicates with it only through the
//! event ring drained at the top of each loop iteration.

use crate::builtin::ExitCode;
use crate::env::{self, Environment};
use crate::executor;
use crate::history::HistoryRing;
use crate::jobs::{JobState, JobTable};
use crate::lexer;
use crate::parser;
use crate::reaper;
use log::debug;
use nix::unistd::{getpgrp, getpid, setpgid, tcsetpgrp, Pid};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, IsTerminal};

pub struct Shell {
    pub env: Environment,
    pub history: HistoryRing,
    pub jobs: JobTable,
    pub last_status: ExitCode,
    /// The shell's own process group; the terminal is returned to it after
    /// every foreground pipeline.
    pub shell_pgid: Pid,
    /// Whether stdin is a terminal. Terminal-ownership calls are skipped
    /// when it is not (scripts, tests, pipes).
    pub interactive: bool,
}

impl Shell {
    pub fn new() -> Self {
        Shell {
            env: Environment::new(),
            history: HistoryRing::new(),
            jobs: JobTable::new(),
            last_status: 0,
            shell_pgid: getpgrp(),
            interactive: false,
        }
    }

    /// Load persisted history, aliases and variables from `$HOME`.
    pub fn load_state(&mut self) {
        self.history.load(&env::history_path());
        self.env.load_config(&env::config_path());
    }

    /// Persist history and config. Best-effort, never fatal.
    pub fn save_state(&self) {
        self.history.save(&env::history_path());
        self.env.save_config(&env::config_path());
    }

    /// Put the shell into its own process group and make that group the
    /// terminal's foreground group. A no-op when stdin is not a terminal.
    pub fn claim_terminal(&mut self) {
        self.interactive = io::stdin().is_terminal();
        if !self.interactive {
            return;
        }
        let pid = getpid();
        let _ = setpgid(pid, pid);
        self.shell_pgid = getpgrp();
        let _ = tcsetpgrp(io::stdin(), self.shell_pgid);
    }

    /// The interactive loop: read a line, run it, repeat until EOF.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        let mut editor = DefaultEditor::new()?;
        loop {
            reaper::drain_into(&mut self.jobs);
            for job in self.jobs.remove_done() {
                println!("[{}]  Done  {}", job.id, job.cmdline);
            }

            match editor.readline(&self.prompt()) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = editor.add_history_entry(line.as_str());
                    self.handle_line(&line);
                }
                // Ctrl-C at the prompt: nothing in the foreground to
                // forward to, so just present a fresh prompt.
                Err(ReadlineError::Interrupted) => continue,
                // EOF behaves like `exit`.
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("mysh: read error: {}", err);
                    break;
                }
            }
        }
        self.save_state();
        Ok(())
    }

    /// Process one raw input line through history expansion, preview mode,
    /// alias expansion, tokenization, parsing and execution.
    pub fn handle_line(&mut self, raw: &str) {
        let Some(line) = self.expand_history(raw) else {
            return;
        };
        self.history.push(&line);

        if let Some(stripped) = line.strip_suffix('?') {
            self.preview(stripped);
            return;
        }

        let expanded = self.env.expand_aliases(&line);
        let tokens = lexer::split_into_tokens(&expanded, &self.env);
        if tokens.is_empty() {
            return;
        }
        debug!("tokens: {:?}", tokens);
        let pipeline = parser::parse_tokens(tokens);
        if pipeline.cmds.is_empty() {
            return;
        }
        let status = executor::run_pipeline(self, &pipeline, &line);
        self.last_status = status;
    }

    /// `!k` recalls history entry `k` (1-based) before any other
    /// processing. Returns `None` when the line should be discarded.
    fn expand_history(&self, raw: &str) -> Option<String> {
        let Some(rest) = raw.strip_prefix('!') else {
            return Some(raw.to_string());
        };
        match rest.trim().parse::<usize>() {
            Ok(k) if k >= 1 => match self.history.get(k) {
                Some(entry) => {
                    println!("{}", entry);
                    Some(entry.to_string())
                }
                None => {
                    eprintln!("mysh: !{}: no such history entry", k);
                    None
                }
            },
            _ => {
                eprintln!("mysh: {}: event not found", raw);
                None
            }
        }
    }

    /// A line ending in `?` shows its tokens instead of executing.
    fn preview(&self, stripped: &str) {
        let expanded = self.env.expand_aliases(stripped);
        let tokens = lexer::split_into_tokens(&expanded, &self.env);
        let rendered: Vec<String> = tokens.iter().map(|t| format!("'{}'", t)).collect();
        println!("tokens: {}", rendered.join(" "));
    }

    fn prompt(&self) -> String {
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "?".to_string());
        let home = env::home_dir().display().to_string();
        let cwd = match cwd.strip_prefix(&home) {
            Some(rest) => format!("~{}", rest),
            None => cwd,
        };
        let marker = if self.last_status == 0 { '$' } else { '!' };
        let running = self.jobs.count(JobState::Running);
        if running > 0 {
            format!("mysh {} [bg:{}] {} ", cwd, running, marker)
        } else {
            format!("mysh {} {} ", cwd, marker)
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}
