//! Built-in command registry and handlers.
//!
//! Grounded on the original `builtin.c`'s `builtins[]` table and
//! `rsh_identify_builtin()` linear lookup, and `source.c`'s `builtin_source`
//! state save/restore around running a script in the current shell. Added
//! `ls`/`cat`/`cp`/`mkdir`/`rm`/`pwd`/`echo`/`export`/`unset` exercise the
//! VFS dispatch layer the way the original's builtins exercised
//! `rsh_file_system` directly.

use std::os::fd::RawFd;

use crate::context::ShellContext;
use crate::error::{Error, Result};
use crate::vfs::OpenFlags;

pub type BuiltinFn = fn(&mut ShellContext, &[String], RawFd, RawFd, RawFd) -> Result<i32>;

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("exit", exit),
    ("cd", cd),
    ("pwd", pwd),
    ("ls", ls),
    ("cat", cat),
    ("cp", cp),
    ("mkdir", mkdir),
    ("rm", rm),
    ("echo", echo),
    ("export", export),
    ("unset", unset),
    ("fg", fg),
    ("bg", bg),
    ("jobs", jobs),
    ("native", native),
    ("source", source),
];

/// `rsh_identify_builtin`.
pub fn lookup(name: &str) -> Option<BuiltinFn> {
    BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

fn write_all(fd: RawFd, s: &str) {
    let _ = nix::unistd::write(fd, s.as_bytes());
}

fn exit(_ctx: &mut ShellContext, argv: &[String], _in: RawFd, _out: RawFd, _err: RawFd) -> Result<i32> {
    let code = argv.get(1).and_then(|s| s.parse::<i32>().ok()).unwrap_or(0);
    std::process::exit(code);
}

fn cd(ctx: &mut ShellContext, argv: &[String], _in: RawFd, _out: RawFd, err: RawFd) -> Result<i32> {
    let target = match argv.len() {
        1 => std::env::var("HOME").unwrap_or_else(|_| "/".to_string()),
        2 => argv[1].clone(),
        _ => {
            write_all(err, "cd: invalid usage\n");
            return Ok(1);
        }
    };
    if ctx.vfs.native_path(&target) {
        std::env::set_current_dir(&target)?;
        Ok(0)
    } else {
        match ctx.vfs.chdir(&target) {
            Ok(()) => Ok(0),
            Err(e) => {
                write_all(err, &format!("cd: {e}\n"));
                Ok(1)
            }
        }
    }
}

fn pwd(ctx: &mut ShellContext, _argv: &[String], _in: RawFd, out: RawFd, _err: RawFd) -> Result<i32> {
    write_all(out, &format!("{}\n", ctx.vfs.getcwd()));
    Ok(0)
}

fn ls(ctx: &mut ShellContext, argv: &[String], _in: RawFd, out: RawFd, err: RawFd) -> Result<i32> {
    let target = argv.get(1).cloned().unwrap_or_else(|| ".".to_string());
    let fd = match ctx.vfs.open(&target, OpenFlags::empty()) {
        Ok(fd) => fd,
        Err(e) => {
            write_all(err, &format!("ls: {target}: {e}\n"));
            return Ok(1);
        }
    };
    loop {
        match ctx.vfs.readdir(fd) {
            Ok(Some(name)) => write_all(out, &format!("{name}\n")),
            Ok(None) => break,
            Err(e) => {
                write_all(err, &format!("ls: {e}\n"));
                break;
            }
        }
    }
    ctx.vfs.close(fd)?;
    Ok(0)
}

fn cat(ctx: &mut ShellContext, argv: &[String], _in: RawFd, out: RawFd, err: RawFd) -> Result<i32> {
    let mut status = 0;
    for path in &argv[1..] {
        let fd = match ctx.vfs.open(path, OpenFlags::empty()) {
            Ok(fd) => fd,
            Err(e) => {
                write_all(err, &format!("cat: {path}: {e}\n"));
                status = 1;
                continue;
            }
        };
        let mut buf = [0u8; 4096];
        loop {
            match ctx.vfs.read(fd, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = nix::unistd::write(out, &buf[..n]);
                }
                Err(e) => {
                    write_all(err, &format!("cat: {path}: {e}\n"));
                    status = 1;
                    break;
                }
            }
        }
        ctx.vfs.close(fd)?;
    }
    Ok(status)
}

fn cp(ctx: &mut ShellContext, argv: &[String], _in: RawFd, _out: RawFd, err: RawFd) -> Result<i32> {
    if argv.len() != 3 {
        write_all(err, "cp: usage: cp SRC DST\n");
        return Ok(1);
    }
    let src_fd = ctx.vfs.open(&argv[1], OpenFlags::empty())?;
    let dst_fd = ctx.vfs.open(&argv[2], OpenFlags::CREAT | OpenFlags::TRUNC)?;
    let mut buf = [0u8; 4096];
    loop {
        let n = ctx.vfs.read(src_fd, &mut buf)?;
        if n == 0 {
            break;
        }
        ctx.vfs.write(dst_fd, &buf[..n])?;
    }
    ctx.vfs.close(src_fd)?;
    ctx.vfs.close(dst_fd)?;
    Ok(0)
}

fn mkdir(ctx: &mut ShellContext, argv: &[String], _in: RawFd, _out: RawFd, err: RawFd) -> Result<i32> {
    let Some(path) = argv.get(1) else {
        write_all(err, "mkdir: missing operand\n");
        return Ok(1);
    };
    match ctx.vfs.mkdir(path) {
        Ok(()) => Ok(0),
        Err(e) => {
            write_all(err, &format!("mkdir: {path}: {e}\n"));
            Ok(1)
        }
    }
}

fn rm(ctx: &mut ShellContext, argv: &[String], _in: RawFd, _out: RawFd, err: RawFd) -> Result<i32> {
    let Some(path) = argv.get(1) else {
        write_all(err, "rm: missing operand\n");
        return Ok(1);
    };
    match ctx.vfs.unlink(path) {
        Ok(()) => Ok(0),
        Err(e) => {
            write_all(err, &format!("rm: {path}: {e}\n"));
            Ok(1)
        }
    }
}

fn echo(_ctx: &mut ShellContext, argv: &[String], _in: RawFd, out: RawFd, _err: RawFd) -> Result<i32> {
    write_all(out, &format!("{}\n", argv[1..].join(" ")));
    Ok(0)
}

fn export(ctx: &mut ShellContext, argv: &[String], _in: RawFd, _out: RawFd, err: RawFd) -> Result<i32> {
    for assignment in &argv[1..] {
        match assignment.split_once('=') {
            Some((name, value)) => ctx.symtab.add(name, value),
            None => write_all(err, &format!("export: invalid assignment {assignment:?}\n")),
        }
    }
    Ok(0)
}

fn unset(ctx: &mut ShellContext, argv: &[String], _in: RawFd, _out: RawFd, _err: RawFd) -> Result<i32> {
    for name in &argv[1..] {
        ctx.symtab.remove(name);
    }
    Ok(0)
}

/// `builtin_fg`: foreground the most recently stopped background job.
fn fg(ctx: &mut ShellContext, _argv: &[String], _in: RawFd, _out: RawFd, err: RawFd) -> Result<i32> {
    let Some((pid, _, _)) = ctx.processes.background_jobs().into_iter().find(|(_, _, running)| !running) else {
        write_all(err, "fg: no process to foreground\n");
        return Ok(0);
    };
    match ctx.processes.continue_foreground(pid)? {
        crate::process::JobOutcome::Exited(code) => Ok(code),
        crate::process::JobOutcome::Signaled(sig) => Ok(128 + sig),
        crate::process::JobOutcome::Stopped => Ok(0),
    }
}

/// `builtin_bg`: resume the most recently stopped background job in place.
fn bg(ctx: &mut ShellContext, _argv: &[String], _in: RawFd, _out: RawFd, err: RawFd) -> Result<i32> {
    let Some((pid, _, _)) = ctx.processes.background_jobs().into_iter().find(|(_, _, running)| !running) else {
        write_all(err, "bg: no process to background\n");
        return Ok(0);
    };
    ctx.processes.background(pid)?;
    Ok(0)
}

/// `builtin_dproc`: list every tracked background job.
fn jobs(ctx: &mut ShellContext, _argv: &[String], _in: RawFd, out: RawFd, _err: RawFd) -> Result<i32> {
    for (pid, command, running) in ctx.processes.background_jobs() {
        write_all(out, &format!("pid {:<5} ({}): {}\n", pid, if running { "running" } else { "stopped" }, command));
    }
    Ok(0)
}

/// Toggle whether a relative path is resolved against the host filesystem
/// or the built-in one, spec.md §4.3's process-wide `native` flag.
fn native(ctx: &mut ShellContext, argv: &[String], _in: RawFd, _out: RawFd, err: RawFd) -> Result<i32> {
    match argv.get(1).map(String::as_str) {
        Some("on") => ctx.vfs.set_native(true),
        Some("off") => ctx.vfs.set_native(false),
        _ => {
            write_all(err, "native: usage: native on|off\n");
            return Ok(1);
        }
    }
    Ok(0)
}

/// `builtin_source`: run a script's statements in the current shell
/// context, saving and restoring the numeric positional-parameter symbols
/// around it (source.c's `_sym_stack_push`/`_sym_stack_pop`).
fn source(ctx: &mut ShellContext, argv: &[String], _in: RawFd, _out: RawFd, err: RawFd) -> Result<i32> {
    let Some(path) = argv.get(1) else {
        write_all(err, "source: missing operand\n");
        return Ok(1);
    };
    let contents = std::fs::read_to_string(path).map_err(Error::HostIo)?;

    let saved: Vec<(String, String)> = ctx.symtab.numeric_entries();
    for (name, _) in &saved {
        ctx.symtab.remove(name);
    }
    for (i, arg) in argv[2..].iter().enumerate() {
        ctx.symtab.add(&i.to_string(), arg);
    }

    let mut status = 0;
    for line in contents.lines() {
        let mut parser = crate::parser::Parser::new(line);
        while let Some(raw) = parser.next_statement() {
            let tokens = crate::lexer::tokenize(&raw, &ctx.symtab)?;
            status = crate::dispatch::dispatch(ctx, tokens)?;
        }
    }

    for (name, _) in ctx.symtab.numeric_entries() {
        ctx.symtab.remove(&name);
    }
    for (name, value) in saved {
        ctx.symtab.add(&name, &value);
    }

    Ok(status)
}
