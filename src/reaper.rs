//! Asynchronous child-status collection and signal forwarding.
//!
//! The SIGCHLD handler reaps every pending child status with a non-blocking
//! `waitpid` loop and records `(pid, event)` pairs in a fixed-size ring of
//! atomics. Only the main loop touches the job table, by draining the ring
//! between input lines, so no shared structure needs locking and the
//! handler stays async-signal-safe (no allocation, no printing).
//!
//! SIGINT and SIGTSTP received by the shell are forwarded to the current
//! foreground process group when one exists and swallowed otherwise.
//! SIGTTOU/SIGTTIN are ignored process-wide so `tcsetpgrp` from a
//! background position cannot stop the shell itself.

use crate::jobs::{JobTable, StatusEvent};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{killpg, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

// Event ring. Single producer (the handler; the kernel masks SIGCHLD while
// it runs) and single consumer (the main loop). When full, events are
// dropped; a dropped Done event is recovered lazily because the process
// group query in JobTable::apply fails the same way for a vanished group.
const RING_LEN: usize = 256;

static EVENT_PID: [AtomicI32; RING_LEN] = [const { AtomicI32::new(0) }; RING_LEN];
static EVENT_KIND: [AtomicI32; RING_LEN] = [const { AtomicI32::new(0) }; RING_LEN];
static HEAD: AtomicUsize = AtomicUsize::new(0);
static TAIL: AtomicUsize = AtomicUsize::new(0);

const KIND_DONE: i32 = 1;
const KIND_STOPPED: i32 = 2;
const KIND_CONTINUED: i32 = 3;

/// Pgid of the current foreground pipeline, 0 when none. Written by the
/// executor around foreground waits, read by the forwarding handlers.
static FG_PGID: AtomicI32 = AtomicI32::new(0);

pub fn set_foreground(pgid: Pid) {
    FG_PGID.store(pgid.as_raw(), Ordering::SeqCst);
}

pub fn clear_foreground() {
    FG_PGID.store(0, Ordering::SeqCst);
}

fn push_event(pid: Pid, kind: i32) {
    let head = HEAD.load(Ordering::Relaxed);
    let tail = TAIL.load(Ordering::Acquire);
    if head.wrapping_sub(tail) >= RING_LEN {
        return;
    }
    EVENT_PID[head % RING_LEN].store(pid.as_raw(), Ordering::Relaxed);
    EVENT_KIND[head % RING_LEN].store(kind, Ordering::Relaxed);
    HEAD.store(head.wrapping_add(1), Ordering::Release);
}

/// Apply all queued child-status events to the job table. Called from the
/// main loop only.
pub fn drain_into(jobs: &mut JobTable) {
    let head = HEAD.load(Ordering::Acquire);
    let mut tail = TAIL.load(Ordering::Relaxed);
    while tail != head {
        let slot = tail % RING_LEN;
        let pid = Pid::from_raw(EVENT_PID[slot].load(Ordering::Relaxed));
        let event = match EVENT_KIND[slot].load(Ordering::Relaxed) {
            KIND_DONE => Some(StatusEvent::Done),
            KIND_STOPPED => Some(StatusEvent::Stopped),
            KIND_CONTINUED => Some(StatusEvent::Continued),
            _ => None,
        };
        if let Some(event) = event {
            jobs.apply(pid, event);
        }
        tail = tail.wrapping_add(1);
    }
    TAIL.store(tail, Ordering::Release);
}

extern "C" fn on_sigchld(_: libc::c_int) {
    let saved_errno = Errno::last_raw();
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::Exited(pid, _)) => push_event(pid, KIND_DONE),
            Ok(WaitStatus::Signaled(pid, _, _)) => push_event(pid, KIND_DONE),
            Ok(WaitStatus::Stopped(pid, _)) => push_event(pid, KIND_STOPPED),
            Ok(WaitStatus::Continued(pid)) => push_event(pid, KIND_CONTINUED),
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => {}
        }
    }
    Errno::set_raw(saved_errno);
}

fn forward_to_foreground(signal: Signal) {
    let pgid = FG_PGID.load(Ordering::SeqCst);
    if pgid > 0 {
        let _ = killpg(Pid::from_raw(pgid), signal);
    }
}

extern "C" fn on_sigint(_: libc::c_int) {
    forward_to_foreground(Signal::SIGINT);
}

extern "C" fn on_sigtstp(_: libc::c_int) {
    forward_to_foreground(Signal::SIGTSTP);
}

/// Install the shell's signal dispositions. Call once at startup, after
/// the shell has claimed its own process group.
pub fn install() -> nix::Result<()> {
    let chld = SigAction::new(
        SigHandler::Handler(on_sigchld),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    let int = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let tstp = SigAction::new(
        SigHandler::Handler(on_sigtstp),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe {
        sigaction(Signal::SIGCHLD, &chld)?;
        sigaction(Signal::SIGINT, &int)?;
        sigaction(Signal::SIGTSTP, &tstp)?;
        sigaction(Signal::SIGTTOU, &ignore)?;
        sigaction(Signal::SIGTTIN, &ignore)?;
    }
    Ok(())
}

/// Restore default dispositions for the job-control signals in a freshly
/// forked child, before exec.
pub fn reset_for_child() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = sigaction(Signal::SIGINT, &default);
        let _ = sigaction(Signal::SIGTSTP, &default);
        let _ = sigaction(Signal::SIGQUIT, &default);
    }
}
