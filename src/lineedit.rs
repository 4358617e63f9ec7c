//! Raw-mode terminal line editor with a bounded history ring.
//!
//! Grounded on the original `readterm.c`'s `_rsh_do_read_line()` and its
//! `rsh_buff`/circular `history[]` globals (`rsh.h`'s `HIST_SIZE`/
//! `BUF_CHUNK`). The original reimplemented canonical-mode line editing by
//! hand (backspace, delete, arrow keys, an escape-sequence state machine)
//! because `read(2)` was a project requirement; `nix::sys::termios` gives
//! us the same raw-mode primitive without reimplementing a libc. History
//! lives only in memory for the process lifetime, never written to disk,
//! matching the original's behavior.

use std::collections::VecDeque;
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::errno::Errno;
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use nix::unistd;

use crate::error::{Error, Result};

/// `HIST_SIZE`: the line editor keeps at most this many prior lines.
const HIST_SIZE: usize = 20;

const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x7f;
const ESC: u8 = 0x1b;

/// Set by [`handle_sigint`]. A real OS signal handler can only touch
/// values safe to mutate from any suspension point, so it does nothing
/// but flip this flag (`AtomicBool::store` is async-signal-safe); the
/// history dump and prompt redraw it triggers happen back on the main
/// thread, the next time [`LineEditor::read_line`] observes an `EINTR`.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Installed as the interactive `SIGINT` handler (spec.md §5): touches
/// nothing but `INTERRUPTED`, never the file-table or process table.
pub extern "C" fn handle_sigint(_signal: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// One line read from the terminal, or the end of input (Ctrl-D on an
/// empty line).
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    Eof,
    Interrupted,
}

/// Owns the raw/cooked termios toggle and the in-memory history ring.
/// `rsh_buff`/`history[]`/`start`/`end`/`current` collapse into a `String`
/// editing buffer plus a `VecDeque<String>`.
pub struct LineEditor {
    fd: RawFd,
    original: Option<Termios>,
    history: VecDeque<String>,
    cursor_in_history: Option<usize>,
}

impl LineEditor {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            original: None,
            history: VecDeque::with_capacity(HIST_SIZE),
            cursor_in_history: None,
        }
    }

    fn term(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }

    /// `rsh_term_init`: disable canonical mode and local echo, one
    /// character per `read(2)`.
    pub fn enter_raw_mode(&mut self) -> Result<()> {
        let mut settings = to_result(termios::tcgetattr(self.term()))?;
        self.original = Some(settings.clone());
        settings.local_flags.remove(LocalFlags::ECHO | LocalFlags::ICANON);
        settings.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        settings.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        to_result(termios::tcsetattr(self.term(), SetArg::TCSANOW, &settings))?;
        Ok(())
    }

    /// Restore whatever termios settings were active before
    /// [`Self::enter_raw_mode`]. Safe to call even if raw mode was never
    /// entered.
    pub fn restore_mode(&mut self) -> Result<()> {
        if let Some(original) = self.original.take() {
            to_result(termios::tcsetattr(self.term(), SetArg::TCSANOW, &original))?;
        }
        Ok(())
    }

    /// `_rsh_do_read_line`: read one line from the terminal, character by
    /// character, honoring backspace, Ctrl-D, and up/down history
    /// recall. The trailing newline is stripped (callers add their own).
    /// Returns [`ReadOutcome::Interrupted`] once, after a `SIGINT` fired
    /// and its history dump has been printed, so the caller can redraw
    /// its own prompt and start a fresh line.
    pub fn read_line(&mut self) -> Result<ReadOutcome> {
        let mut buf = String::new();
        self.cursor_in_history = None;
        let mut byte = [0u8; 1];

        loop {
            let n = match unistd::read(self.fd, &mut byte) {
                Ok(n) => n,
                Err(Errno::EINTR) => {
                    if INTERRUPTED.swap(false, Ordering::SeqCst) {
                        write_raw(self.term(), b"\n");
                        self.print_history();
                        return Ok(ReadOutcome::Interrupted);
                    }
                    continue;
                }
                Err(e) => return Err(Error::HostIo(std::io::Error::from(e))),
            };
            if n == 0 {
                if buf.is_empty() {
                    return Ok(ReadOutcome::Eof);
                }
                break;
            }
            let c = byte[0];

            match c {
                b'\n' | b'\r' => {
                    write_raw(self.term(), b"\r\n");
                    break;
                }
                CTRL_D if buf.is_empty() => return Ok(ReadOutcome::Eof),
                BACKSPACE => {
                    if buf.pop().is_some() {
                        write_raw(self.term(), b"\x08 \x08");
                    }
                }
                ESC => {
                    if let Some(replacement) = self.handle_escape_seq()? {
                        redraw(self.term(), &buf, &replacement);
                        buf = replacement;
                    }
                }
                _ => {
                    let ch = c as char;
                    buf.push(ch);
                    write_raw(self.term(), &[c]);
                }
            }
        }

        self.historify(&buf);
        Ok(ReadOutcome::Line(buf))
    }

    /// `_rsh_handle_escape_seq`: only the up/down arrow (history recall)
    /// sequences are acted on; anything else is consumed and ignored.
    /// Returns the replacement buffer contents when history recall fired.
    fn handle_escape_seq(&mut self) -> Result<Option<String>> {
        if read_one(self.fd)? != Some(b'[') {
            return Ok(None);
        }
        match read_one(self.fd)? {
            Some(b'A') => Ok(Some(self.history_prev())),
            Some(b'B') => Ok(Some(self.history_next())),
            _ => Ok(None),
        }
    }

    /// `_rsh_do_history_completion(0)`: step to an older entry.
    fn history_prev(&mut self) -> String {
        if self.history.is_empty() {
            return String::new();
        }
        let idx = match self.cursor_in_history {
            Some(0) => 0,
            Some(i) => i - 1,
            None => self.history.len() - 1,
        };
        self.cursor_in_history = Some(idx);
        self.history[idx].clone()
    }

    /// `_rsh_do_history_completion(1)`: step to a newer entry, or back to
    /// an empty line once the stack bottoms out.
    fn history_next(&mut self) -> String {
        match self.cursor_in_history {
            Some(i) if i + 1 < self.history.len() => {
                self.cursor_in_history = Some(i + 1);
                self.history[i + 1].clone()
            }
            _ => {
                self.cursor_in_history = None;
                String::new()
            }
        }
    }

    /// `rsh_historify`: add a non-blank line to the ring, evicting the
    /// oldest entry once full.
    fn historify(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if self.history.len() == HIST_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(line.to_string());
    }

    /// `rsh_history_print`: numbered history listing, oldest first.
    pub fn print_history(&self) {
        for (i, line) in self.history.iter().enumerate() {
            println!("{:<3} {}", i + 1, line);
        }
    }
}

fn read_one(fd: RawFd) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match unistd::read(fd, &mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(Error::HostIo(std::io::Error::from(e))),
        }
    }
}

fn to_result<T>(r: std::result::Result<T, Errno>) -> Result<T> {
    r.map_err(|e| Error::HostIo(std::io::Error::from(e)))
}

fn write_raw(fd: BorrowedFd<'_>, bytes: &[u8]) {
    let _ = unistd::write(fd, bytes);
}

/// Rewrite the visible line in place: erase what was there (one backspace
/// sequence per character) and print the replacement.
fn redraw(fd: BorrowedFd<'_>, old: &str, new: &str) {
    for _ in 0..old.chars().count() {
        write_raw(fd, b"\x08 \x08");
    }
    write_raw(fd, new.as_bytes());
}

impl Drop for LineEditor {
    fn drop(&mut self) {
        let _ = self.restore_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historify_skips_blank_lines() {
        let mut editor = LineEditor::new(0);
        editor.historify("   ");
        assert!(editor.history.is_empty());
        editor.historify("echo hi");
        assert_eq!(editor.history.len(), 1);
    }

    #[test]
    fn historify_evicts_oldest_past_capacity() {
        let mut editor = LineEditor::new(0);
        for i in 0..HIST_SIZE + 5 {
            editor.historify(&format!("cmd{i}"));
        }
        assert_eq!(editor.history.len(), HIST_SIZE);
        assert_eq!(editor.history.front().unwrap(), "cmd5");
    }

    #[test]
    fn history_prev_then_next_returns_to_blank() {
        let mut editor = LineEditor::new(0);
        editor.historify("first");
        editor.historify("second");
        assert_eq!(editor.history_prev(), "second");
        assert_eq!(editor.history_prev(), "first");
        assert_eq!(editor.history_next(), "second");
        assert_eq!(editor.history_next(), "");
    }
}
