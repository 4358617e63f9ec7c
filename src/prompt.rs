//! Prompt formatting.
//!
//! Grounded on the original `prompt.c`, which kept the prompt string in
//! the symbol table under `PROMPT` and printed it character-for-character
//! with no escape-sequence expansion ("For now this will remain really
//! stupid"). Rendered here instead of stored as a static symbol, since the
//! VFS's current working directory already lives outside the symbol table.

use crate::context::ShellContext;

/// Default shown before `ctx.symtab`'s `PROMPT` entry (if any) is
/// consulted, in the style of the original's `prompt_init`'s
/// `"[rsh]$ "` default.
const DEFAULT_PROMPT_TAIL: &str = "$ ";

/// `prompt_print`: render the primary prompt for one new statement.
/// Honors a user-set `PROMPT` symbol verbatim, falling back to
/// `user@host:cwd$ ` built from the VFS's current directory.
pub fn primary(ctx: &ShellContext) -> String {
    if let Some(custom) = ctx.symtab.get("PROMPT") {
        return custom;
    }
    format!("{}:{}{}", whoami(), ctx.vfs.getcwd(), DEFAULT_PROMPT_TAIL)
}

/// Shown while the line editor is still collecting a statement that spans
/// multiple physical lines (an unterminated quote, for instance).
pub fn continuation(_ctx: &ShellContext) -> &'static str {
    "> "
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "rsh".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ShellConfig, ShellContext};

    fn test_ctx() -> ShellContext {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ShellConfig::default();
        config.image_path = dir.path().join("image.img");
        ShellContext::new(config, 0).unwrap()
    }

    #[test]
    fn custom_prompt_symbol_wins() {
        let mut ctx = test_ctx();
        ctx.symtab.add("PROMPT", "% ");
        assert_eq!(primary(&ctx), "% ");
    }

    #[test]
    fn continuation_prompt_is_stable() {
        let ctx = test_ctx();
        assert_eq!(continuation(&ctx), "> ");
    }
}
