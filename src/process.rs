//! Job-control process execution: process groups, foreground/background
//! transitions, terminal ownership, pipe fd lifecycle, waitpid reaping.
//!
//! Grounded on the original `exec.h`/`exec.c` (`rsh_process`,
//! `rsh_process_group`, `init_rsh_pgroup`, `rsh_exec`, `foreground`,
//! `background`, `check_processes`) reworked into owned Rust types instead
//! of a fixed-size C array of structs, using `nix` for the underlying
//! fork/exec/waitpid/termios syscalls.

use std::ffi::CString;
use std::os::fd::{BorrowedFd, RawFd};

use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

use crate::error::{Error, Result};

/// Which end of its pipe pair a process occupies, mirroring
/// `rsh_process::pipe_lane` in the original `exec.h`: `In` reads the pipe as
/// its stdin (and must close the write end before `execvp`), `Out`/`Err`
/// feed it as their stdout/stderr (and must close the read end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeLane {
    None,
    In,
    Out,
    Err,
}

/// One exec'd command, corresponding to `struct rsh_process` in `exec.h`.
pub struct ProcessRecord {
    pub pid: Pid,
    pub pgid: Pid,
    pub stdin: RawFd,
    pub stdout: RawFd,
    pub stderr: RawFd,
    pub background: bool,
    pub running: bool,
    pub name: String,
    pub pipe: Option<(RawFd, RawFd)>,
    pub pipe_lane: PipeLane,
    pub command: String,
    pub argv: Vec<String>,
}

impl ProcessRecord {
    fn new(command: String, argv: Vec<String>, stdin: RawFd, stdout: RawFd, stderr: RawFd, background: bool) -> Self {
        let name = argv.first().cloned().unwrap_or_default();
        Self {
            pid: Pid::from_raw(0),
            pgid: Pid::from_raw(0),
            stdin,
            stdout,
            stderr,
            background,
            running: false,
            name,
            pipe: None,
            pipe_lane: PipeLane::None,
            command,
            argv,
        }
    }
}

/// The final disposition of a waited-on job, used by the dispatcher to
/// decide what to print and what exit status to remember.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Exited(i32),
    Signaled(i32),
    Stopped,
}

/// One slot in the bounded-growable process-group table, corresponding to
/// `struct rsh_process_group` in `exec.h`. Slot 0 is the shell itself and
/// is never reassigned.
struct GroupSlot {
    used: bool,
    pgid: Pid,
    process: Option<ProcessRecord>,
}

const TABLE_GROWTH: usize = 8;

/// Table of live/background process groups. Grows by 8 whenever full,
/// never shrinks, per spec.md §3.
pub struct ProcessGroupTable {
    slots: Vec<GroupSlot>,
    shell_pgid: Pid,
    terminal_fd: RawFd,
    interactive: bool,
}

impl ProcessGroupTable {
    /// `init_rsh_pgroup`: put the shell in its own process group and claim
    /// the controlling terminal, if running interactively on a tty.
    pub fn new(terminal_fd: RawFd) -> Result<Self> {
        let term = unsafe { BorrowedFd::borrow_raw(terminal_fd) };
        let interactive = unistd::isatty(term).unwrap_or(false);
        let shell_pgid = unistd::getpid();
        if interactive {
            // Loop until the shell is in the foreground process group,
            // backgrounding itself if launched into a non-foreground
            // group (mirrors `init_rsh_pgroup`'s handling of a shell
            // started under job control from another shell).
            while unistd::tcgetpgrp(term).map(|pg| pg != shell_pgid).unwrap_or(false) {
                let _ = signal::kill(Pid::from_raw(-shell_pgid.as_raw()), Signal::SIGTTIN);
            }
            unsafe {
                let _ = signal::signal(Signal::SIGINT, SigHandler::SigIgn);
                let _ = signal::signal(Signal::SIGQUIT, SigHandler::SigIgn);
                let _ = signal::signal(Signal::SIGTSTP, SigHandler::SigIgn);
                let _ = signal::signal(Signal::SIGTTIN, SigHandler::SigIgn);
                let _ = signal::signal(Signal::SIGTTOU, SigHandler::SigIgn);
            }
            unistd::setpgid(shell_pgid, shell_pgid).map_err(|e| Error::HostIo(std::io::Error::from(e)))?;
            unistd::tcsetpgrp(term, shell_pgid).map_err(|e| Error::HostIo(std::io::Error::from(e)))?;
        }
        Ok(Self {
            slots: vec![GroupSlot {
                used: true,
                pgid: shell_pgid,
                process: None,
            }],
            shell_pgid,
            terminal_fd,
            interactive,
        })
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    fn term(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(self.terminal_fd) }
    }

    fn alloc_slot(&mut self) -> usize {
        if let Some(idx) = self.slots.iter().skip(1).position(|s| !s.used) {
            return idx + 1;
        }
        let base = self.slots.len();
        for _ in 0..TABLE_GROWTH {
            self.slots.push(GroupSlot {
                used: false,
                pgid: Pid::from_raw(0),
                process: None,
            });
        }
        base
    }

    /// `rsh_exec`: fork, set up the child's pgid/std descriptors/job-control
    /// signals, execvp the command, and record the resulting process group.
    /// `new_group` starts a new process group (the pipeline's leader);
    /// later stages pass `Some(existing_pgid)` to join it.
    pub fn exec(
        &mut self,
        command: &str,
        argv: Vec<String>,
        stdin: RawFd,
        stdout: RawFd,
        stderr: RawFd,
        background: bool,
        join_pgid: Option<Pid>,
        pipe_lane: PipeLane,
        pipe: Option<(RawFd, RawFd)>,
    ) -> Result<Pid> {
        let program = CString::new(argv[0].as_str()).map_err(|_| Error::Invalid("argv[0] contains a NUL byte".into()))?;
        let c_argv: Vec<CString> = argv
            .iter()
            .map(|a| CString::new(a.as_str()).map_err(|_| Error::Invalid(format!("{a:?} contains a NUL byte"))))
            .collect::<Result<_>>()?;

        match unsafe { unistd::fork() }.map_err(|e| Error::HostIo(std::io::Error::from(e)))? {
            ForkResult::Child => {
                let pid = unistd::getpid();
                let pgid = join_pgid.unwrap_or(pid);
                let _ = unistd::setpgid(pid, pgid);
                if self.interactive && !background && join_pgid.is_none() {
                    let _ = unistd::tcsetpgrp(self.term(), pgid);
                }
                if let Some((read_end, write_end)) = pipe {
                    match pipe_lane {
                        PipeLane::In => {
                            let _ = unistd::close(write_end);
                        }
                        PipeLane::Out | PipeLane::Err => {
                            let _ = unistd::close(read_end);
                        }
                        PipeLane::None => {}
                    }
                }
                unsafe {
                    let _ = signal::signal(Signal::SIGINT, SigHandler::SigDfl);
                    let _ = signal::signal(Signal::SIGQUIT, SigHandler::SigDfl);
                    let _ = signal::signal(Signal::SIGTSTP, SigHandler::SigDfl);
                    let _ = signal::signal(Signal::SIGTTIN, SigHandler::SigDfl);
                    let _ = signal::signal(Signal::SIGTTOU, SigHandler::SigDfl);
                }
                if stdin != 0 {
                    let _ = unistd::dup2(stdin, 0);
                }
                if stdout != 1 {
                    let _ = unistd::dup2(stdout, 1);
                }
                if stderr != 2 {
                    let _ = unistd::dup2(stderr, 2);
                }
                let _ = unistd::execvp(&program, &c_argv);
                std::process::exit(127);
            }
            ForkResult::Parent { child } => {
                let pgid = join_pgid.unwrap_or(child);
                let _ = unistd::setpgid(child, pgid);
                if self.interactive && !background && join_pgid.is_none() {
                    let _ = unistd::tcsetpgrp(self.term(), pgid);
                }

                let idx = self.alloc_slot();
                let mut record = ProcessRecord::new(command.to_string(), argv, stdin, stdout, stderr, background);
                record.pid = child;
                record.pgid = pgid;
                record.running = true;
                record.pipe = pipe;
                record.pipe_lane = pipe_lane;
                self.slots[idx] = GroupSlot {
                    used: true,
                    pgid,
                    process: Some(record),
                };
                Ok(child)
            }
        }
    }

    fn slot_of_pid(&mut self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.used && s.process.as_ref().map(|p| p.pid) == Some(pid))
    }

    /// `shell_fg`/`foreground`: give the terminal to `pgid`, wait for the
    /// named process (blocking, `WUNTRACED`), then take the terminal back.
    pub fn foreground(&mut self, pid: Pid) -> Result<JobOutcome> {
        if self.interactive {
            unistd::tcsetpgrp(self.term(), self.pgid_of(pid)).map_err(|e| Error::HostIo(std::io::Error::from(e)))?;
        }
        let outcome = self.wait_for(pid, true)?;
        if self.interactive {
            let _ = unistd::tcsetpgrp(self.term(), self.shell_pgid);
        }
        Ok(outcome)
    }

    /// `background`: resume a stopped job in the background via `SIGCONT`
    /// without touching the controlling terminal.
    pub fn background(&mut self, pid: Pid) -> Result<()> {
        let pgid = self.pgid_of(pid);
        signal::kill(Pid::from_raw(-pgid.as_raw()), Signal::SIGCONT).map_err(|e| Error::HostIo(std::io::Error::from(e)))?;
        if let Some(idx) = self.slot_of_pid(pid) {
            if let Some(p) = self.slots[idx].process.as_mut() {
                p.running = true;
                p.background = true;
            }
        }
        Ok(())
    }

    /// Resume a stopped job and wait on it in the foreground (`fg`).
    pub fn continue_foreground(&mut self, pid: Pid) -> Result<JobOutcome> {
        let pgid = self.pgid_of(pid);
        if self.interactive {
            unistd::tcsetpgrp(self.term(), pgid).map_err(|e| Error::HostIo(std::io::Error::from(e)))?;
        }
        signal::kill(Pid::from_raw(-pgid.as_raw()), Signal::SIGCONT).map_err(|e| Error::HostIo(std::io::Error::from(e)))?;
        let outcome = self.wait_for(pid, true)?;
        if self.interactive {
            let _ = unistd::tcsetpgrp(self.term(), self.shell_pgid);
        }
        Ok(outcome)
    }

    fn pgid_of(&self, pid: Pid) -> Pid {
        self.slots
            .iter()
            .find(|s| s.used && s.process.as_ref().map(|p| p.pid) == Some(pid))
            .map(|s| s.pgid)
            .unwrap_or(pid)
    }

    fn wait_for(&mut self, pid: Pid, block: bool) -> Result<JobOutcome> {
        let flags = if block {
            WaitPidFlag::WUNTRACED
        } else {
            WaitPidFlag::WUNTRACED | WaitPidFlag::WNOHANG
        };
        loop {
            let status = waitpid(pid, Some(flags)).map_err(|e| Error::HostIo(std::io::Error::from(e)))?;
            match status {
                WaitStatus::Exited(p, code) => {
                    self.reap(p);
                    return Ok(JobOutcome::Exited(code));
                }
                WaitStatus::Signaled(p, sig, _) => {
                    self.reap(p);
                    return Ok(JobOutcome::Signaled(sig as i32));
                }
                WaitStatus::Stopped(p, _) => {
                    if let Some(idx) = self.slot_of_pid(p) {
                        if let Some(proc) = self.slots[idx].process.as_mut() {
                            proc.running = false;
                        }
                    }
                    return Ok(JobOutcome::Stopped);
                }
                WaitStatus::StillAlive => {
                    if !block {
                        return Ok(JobOutcome::Stopped);
                    }
                }
                _ => {}
            }
        }
    }

    fn reap(&mut self, pid: Pid) {
        if let Some(idx) = self.slot_of_pid(pid) {
            self.slots[idx].used = false;
            self.slots[idx].process = None;
        }
    }

    /// `check_processes`: non-blocking reap pass over every background job,
    /// called once per prompt iteration. Returns the jobs that changed
    /// state this pass, for the dispatcher to report.
    pub fn check_processes(&mut self) -> Vec<(Pid, JobOutcome)> {
        let mut changed = Vec::new();
        let pids: Vec<Pid> = self.slots[1..]
            .iter()
            .filter(|s| s.used)
            .filter_map(|s| s.process.as_ref().map(|p| p.pid))
            .collect();
        for pid in pids {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
                Ok(WaitStatus::Exited(p, code)) => {
                    changed.push((p, JobOutcome::Exited(code)));
                    self.reap(p);
                }
                Ok(WaitStatus::Signaled(p, sig, _)) => {
                    changed.push((p, JobOutcome::Signaled(sig as i32)));
                    self.reap(p);
                }
                Ok(WaitStatus::Stopped(p, _)) => {
                    changed.push((p, JobOutcome::Stopped));
                }
                _ => {}
            }
        }
        changed
    }

    /// Lists the pids of every still-tracked background job (for the
    /// `jobs` built-in).
    pub fn background_jobs(&self) -> Vec<(Pid, String, bool)> {
        self.slots[1..]
            .iter()
            .filter(|s| s.used)
            .filter_map(|s| s.process.as_ref())
            .filter(|p| p.background)
            .map(|p| (p.pid, p.command.clone(), p.running))
            .collect()
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }
}
