//! End-to-end tests over the dispatcher, path classification, and real
//! job control, as opposed to `fat_engine.rs`'s direct FAT16 engine tests.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;

use rsh::context::{ShellConfig, ShellContext};
use rsh::process::JobOutcome;
use rsh::{dispatch, lexer};

/// `ShellContext::new` needs a terminal fd to probe with `isatty`; `/dev/null`
/// is never a tty, so the process table comes up non-interactive and every
/// test here runs without a controlling terminal. The `File` is returned
/// alongside the context so its descriptor stays open for the context's
/// lifetime instead of closing under it.
fn test_context() -> (tempfile::TempDir, std::fs::File, ShellContext) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ShellConfig::default();
    config.image_path = dir.path().join("image.img");
    let devnull = OpenOptions::new().read(true).open("/dev/null").unwrap();
    let ctx = ShellContext::new(config, devnull.as_raw_fd()).unwrap();
    (dir, devnull, ctx)
}

#[test]
fn native_path_classifies_builtin_root_etc_and_relative_by_flag() {
    let (_dir, _devnull, mut ctx) = test_context();
    let builtin_root = ctx.vfs.builtin_root().to_string();

    assert!(!ctx.vfs.native_path(&format!("/{builtin_root}/report.txt")));
    assert!(ctx.vfs.native_path("/etc/passwd"));

    assert!(!ctx.vfs.native());
    assert_eq!(ctx.vfs.native_path("report.txt"), ctx.vfs.native());

    ctx.vfs.set_native(true);
    assert!(ctx.vfs.native_path("report.txt"));
}

#[test]
fn dispatch_runs_builtin_with_output_redirected_to_a_host_file() {
    let (dir, _devnull, mut ctx) = test_context();
    let out_path = dir.path().join("out.txt");

    let tokens = lexer::tokenize(&format!("echo hello world > {}", out_path.display()), &ctx.symtab).unwrap();
    let status = dispatch::dispatch(&mut ctx, tokens).unwrap();

    assert_eq!(status, 0);
    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "hello world\n");
}

#[test]
fn dispatch_pipeline_between_two_host_processes() {
    // Absolute paths so these resolve to real forked processes rather than
    // the path-based `echo`/`cat` builtins, which shadow the bare names.
    let (dir, _devnull, mut ctx) = test_context();
    let out_path = dir.path().join("piped.txt");

    let line = format!("/bin/echo banana | /bin/cat > {}", out_path.display());
    let tokens = lexer::tokenize(&line, &ctx.symtab).unwrap();
    let status = dispatch::dispatch(&mut ctx, tokens).unwrap();

    assert_eq!(status, 0);
    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "banana\n");
}

#[test]
fn foreground_external_command_reports_its_exit_status() {
    let (_dir, _devnull, mut ctx) = test_context();

    let tokens = lexer::tokenize("true", &ctx.symtab).unwrap();
    assert_eq!(dispatch::dispatch(&mut ctx, tokens).unwrap(), 0);

    let tokens = lexer::tokenize("false", &ctx.symtab).unwrap();
    assert_eq!(dispatch::dispatch(&mut ctx, tokens).unwrap(), 1);
}

#[test]
fn background_job_is_listed_then_reaped_with_its_exit_status() {
    let (_dir, _devnull, mut ctx) = test_context();

    let tokens = lexer::tokenize("true &", &ctx.symtab).unwrap();
    dispatch::dispatch(&mut ctx, tokens).unwrap();

    let jobs = ctx.processes.background_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].1, "true");

    std::thread::sleep(std::time::Duration::from_millis(200));
    let changed = ctx.processes.check_processes();
    assert_eq!(changed.len(), 1);
    assert!(matches!(changed[0].1, JobOutcome::Exited(0)));
    assert!(ctx.processes.background_jobs().is_empty());
}
