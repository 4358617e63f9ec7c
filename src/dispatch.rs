//! Command dispatcher: consumes one statement's tokens and drives the
//! built-in registry or the process engine.
//!
//! Grounded on the original `command.c`'s `rsh_command()`/
//! `dispatch_process()` state machine (`S_BASE`/`S_COMMAND`, a running
//! `pipe_status` bitmask, `proc_stdin`/`proc_stdout`/`proc_stderr`),
//! reworked around owned Rust values instead of file-scope globals.
//!
//! Redirecting an external process's stdin/stdout/stderr always targets a
//! host path: `dup2` needs a real OS descriptor, and the built-in
//! filesystem's tagged descriptors aren't one (see DESIGN.md). Built-in
//! commands, which run in-process, read and write the built-in filesystem
//! directly through [`crate::vfs::Vfs`] with no such restriction.

use std::os::fd::RawFd;

use nix::unistd::Pid;

use crate::builtins;
use crate::context::ShellContext;
use crate::error::{Error, Result};
use crate::lexer::Token;
use crate::process::PipeLane;
use crate::vfs::OpenFlags;

/// A command being assembled token by token, mirroring `command`/`argv`/
/// `argc` plus the redirect/pipe state in the original `command.c`: three
/// descriptors, a pipe kind (NONE/IN/OUT/ERR), and the one reusable pipe
/// pair that kind refers to.
struct Pending {
    argv: Vec<String>,
    stdin: RawFd,
    stdout: RawFd,
    stderr: RawFd,
    opened: Vec<RawFd>,
    joins_pipe_in: bool,
    pipe_lane: PipeLane,
    pipe: Option<(RawFd, RawFd)>,
}

impl Pending {
    fn new(stdin: RawFd, stdout: RawFd, stderr: RawFd) -> Self {
        Self {
            argv: Vec::new(),
            stdin,
            stdout,
            stderr,
            opened: Vec::new(),
            joins_pipe_in: false,
            pipe_lane: PipeLane::None,
            pipe: None,
        }
    }

    fn close_opened(&mut self) {
        for fd in self.opened.drain(..) {
            let _ = nix::unistd::close(fd);
        }
    }
}

/// `rsh_command`: execute one fully-tokenized statement. Returns the exit
/// status to store in `$?`.
pub fn dispatch(ctx: &mut ShellContext, tokens: Vec<Token>) -> Result<i32> {
    let mut pending = Pending::new(0, 1, 2);
    let mut pipeline_pgid: Option<Pid> = None;
    let mut last_status = 0;
    let mut iter = tokens.into_iter().peekable();

    while let Some(tok) = iter.next() {
        match tok {
            Token::Word(word) => pending.argv.push(word),
            // spec.md line 142: a SYMDEF token only ever carries the name
            // (the trailing `=` is already stripped by the lexer); if the
            // next token in the stream is a WORD, consume it as the value,
            // otherwise the symbol is recorded with an empty value.
            Token::SymDef(name) => {
                let value = match iter.peek() {
                    Some(Token::Word(_)) => match iter.next() {
                        Some(Token::Word(value)) => value,
                        _ => unreachable!(),
                    },
                    _ => String::new(),
                };
                ctx.symtab.add(&name, &value);
            }
            Token::RedirectIn(path) => {
                let fd = crate::vfs::open_host_raw(&path, OpenFlags::empty())?;
                pending.stdin = fd;
                pending.opened.push(fd);
            }
            Token::RedirectOut(path) => {
                let fd = crate::vfs::open_host_raw(&path, OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::WRONLY)?;
                pending.stdout = fd;
                pending.opened.push(fd);
            }
            Token::RedirectErr(path) => {
                let fd = crate::vfs::open_host_raw(&path, OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::WRONLY)?;
                pending.stderr = fd;
                pending.opened.push(fd);
            }
            Token::AppendOut(path) => {
                let fd = crate::vfs::open_host_raw(&path, OpenFlags::CREAT | OpenFlags::APPEND | OpenFlags::WRONLY)?;
                pending.stdout = fd;
                pending.opened.push(fd);
            }
            Token::AppendErr(path) => {
                let fd = crate::vfs::open_host_raw(&path, OpenFlags::CREAT | OpenFlags::APPEND | OpenFlags::WRONLY)?;
                pending.stderr = fd;
                pending.opened.push(fd);
            }
            Token::Pipe | Token::PipeErr => {
                if matches!(iter.peek(), None | Some(Token::Null)) {
                    pending.close_opened();
                    return Err(Error::Invalid("missing read half of pipe command".into()));
                }
                let (read_end, write_end) = nix::unistd::pipe().map_err(|e| Error::HostIo(std::io::Error::from(e)))?;
                if matches!(tok, Token::PipeErr) {
                    pending.stderr = write_end;
                    pending.pipe_lane = PipeLane::Err;
                } else {
                    pending.pipe_lane = PipeLane::Out;
                }
                pending.stdout = write_end;
                pending.pipe = Some((read_end, write_end));

                last_status = dispatch_one(ctx, &mut pending, true, &mut pipeline_pgid)?;
                let _ = nix::unistd::close(write_end);

                pending = Pending::new(read_end, 1, 2);
                pending.joins_pipe_in = true;
                pending.pipe_lane = PipeLane::In;
                pending.pipe = Some((read_end, write_end));
                pending.opened.push(read_end);
            }
            Token::Background => {
                last_status = dispatch_one(ctx, &mut pending, true, &mut pipeline_pgid)?;
                pending = Pending::new(0, 1, 2);
                pipeline_pgid = None;
            }
            Token::Null => {
                if !pending.argv.is_empty() {
                    last_status = dispatch_one(ctx, &mut pending, false, &mut pipeline_pgid)?;
                }
            }
        }
    }

    ctx.last_status = last_status;
    Ok(last_status)
}

fn dispatch_one(ctx: &mut ShellContext, pending: &mut Pending, background: bool, pipeline_pgid: &mut Option<Pid>) -> Result<i32> {
    if pending.argv.is_empty() {
        pending.close_opened();
        return Ok(ctx.last_status);
    }
    let command = pending.argv[0].clone();

    if let Some(builtin) = builtins::lookup(&command) {
        let status = builtin(ctx, &pending.argv, pending.stdin, pending.stdout, pending.stderr);
        pending.close_opened();
        return status;
    }

    let join = pending.joins_pipe_in.then_some(*pipeline_pgid).flatten();
    let pid = ctx.processes.exec(
        &command,
        pending.argv.clone(),
        pending.stdin,
        pending.stdout,
        pending.stderr,
        background,
        join,
        pending.pipe_lane,
        pending.pipe,
    )?;
    if pipeline_pgid.is_none() {
        *pipeline_pgid = Some(pid);
    }
    pending.close_opened();

    if background {
        Ok(0)
    } else {
        match ctx.processes.foreground(pid)? {
            crate::process::JobOutcome::Exited(code) => Ok(code),
            crate::process::JobOutcome::Signaled(sig) => Ok(128 + sig),
            crate::process::JobOutcome::Stopped => Ok(0),
        }
    }
}
