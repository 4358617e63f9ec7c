//! Entry point: parses arguments, builds a [`rsh::context::ShellContext`],
//! sources `$HOME/.rshrc`, and runs either a script or the interactive
//! line-editor loop.
//!
//! Grounded on the original `main.c`'s `rsh_init()`/`rsh_rc_init()`/
//! `run_script()`/`run_interactive()` sequence (`rsh.h`'s prototypes).

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::sys::signal::{self, SigHandler, Signal};

use rsh::context::ShellContext;
use rsh::error::Result;
use rsh::lineedit::{LineEditor, ReadOutcome};
use rsh::{builtins, config, dispatch, lexer, parser::Parser, prompt};

fn main() {
    let config = match config::parse(std::env::args()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("rsh: {e}");
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if config.debug { "debug" } else { "info" })).init();

    let mut ctx = match ShellContext::new(config, 0) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("rsh: {e}");
            std::process::exit(1);
        }
    };

    source_rc_file(&mut ctx);

    let script = ctx.config.script.clone();
    let script_args = ctx.config.script_args.clone();

    let status = if let Some(path) = script {
        run_script(&mut ctx, &path, &script_args)
    } else if ctx.is_interactive() {
        run_interactive(&mut ctx)
    } else {
        run_stdin_script(&mut ctx)
    };

    std::process::exit(status);
}

/// `rsh_rc_init`: best-effort; a missing or unreadable rc file is not an
/// error.
fn source_rc_file(ctx: &mut ShellContext) {
    let Ok(home) = std::env::var("HOME") else { return };
    let rc_path = PathBuf::from(home).join(".rshrc");
    if !rc_path.exists() {
        return;
    }
    if let Some(source) = builtins::lookup("source") {
        let argv = vec!["source".to_string(), rc_path.to_string_lossy().into_owned()];
        if let Err(e) = source(ctx, &argv, 0, 1, 2) {
            eprintln!("rsh: .rshrc: {e}");
        }
    }
}

/// `run_script`: read `path`, bind `args` as `$1`, `$2`, ... and run every
/// statement, returning the last exit status.
fn run_script(ctx: &mut ShellContext, path: &Path, args: &[String]) -> i32 {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("rsh: {}: {e}", path.display());
            return 1;
        }
    };
    for (i, arg) in args.iter().enumerate() {
        ctx.symtab.add(&(i + 1).to_string(), arg);
    }
    for line in contents.lines() {
        run_line(ctx, line);
    }
    ctx.last_status
}

/// `script_shell`: a non-interactive shell reading statements from stdin
/// rather than a named file (piped input, no controlling terminal).
fn run_stdin_script(ctx: &mut ShellContext) -> i32 {
    for line in io::stdin().lines() {
        match line {
            Ok(line) => run_line(ctx, &line),
            Err(_) => break,
        }
    }
    ctx.last_status
}

/// `run_interactive`: the line-editor REPL. Reaps finished background
/// jobs lazily at each prompt cycle (spec.md §5).
fn run_interactive(ctx: &mut ShellContext) -> i32 {
    let mut editor = LineEditor::new(0);
    let _ = editor.enter_raw_mode();
    unsafe {
        let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(rsh::lineedit::handle_sigint));
    }

    show_prompt(ctx);
    loop {
        for (pid, outcome) in ctx.processes.check_processes() {
            log::debug!("background job {pid} finished: {outcome:?}");
        }
        match editor.read_line() {
            Ok(ReadOutcome::Eof) => break,
            Ok(ReadOutcome::Interrupted) => show_prompt(ctx),
            Ok(ReadOutcome::Line(line)) => {
                run_line(ctx, &line);
                show_prompt(ctx);
            }
            Err(e) => {
                eprintln!("rsh: {e}");
                show_prompt(ctx);
            }
        }
    }
    println!();
    ctx.last_status
}

fn show_prompt(ctx: &ShellContext) {
    print!("{}", prompt::primary(ctx));
    let _ = io::stdout().flush();
}

/// Split `line` into statements and dispatch each, reporting a syntax or
/// runtime error as a single diagnostic line and moving on to the next
/// statement (spec.md §7) — except `Error::Corrupt`, which is fatal.
fn run_line(ctx: &mut ShellContext, line: &str) {
    let mut statements = Parser::new(line);
    while let Some(raw) = statements.next_statement() {
        if let Err(e) = run_statement(ctx, &raw) {
            if e.is_corrupt() {
                log::error!("{e}");
                std::process::abort();
            }
            eprintln!("rsh: {e}");
        }
    }
}

fn run_statement(ctx: &mut ShellContext, raw: &str) -> Result<()> {
    let tokens = lexer::tokenize(raw, &ctx.symtab)?;
    dispatch::dispatch(ctx, tokens)?;
    Ok(())
}
