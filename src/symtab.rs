//! The shell's symbol table: a local name/value store that defers to the
//! process environment for any name already present there, plus an
//! iterator over decimal-integer-named entries for `$*`/positional-
//! parameter expansion.
//!
//! Grounded on the original `symbol_table.c`/`symbol_table.h`
//! (`symtable_add`/`symtable_get`/`symtable_remove`/`symtable_numeric`,
//! two distinct tables: libc `env` and a local linked list), reworked as
//! an ordered `Vec` of entries instead of a linear linked list with a
//! two-entry lookup cache — an ordered `Vec` keeps insertion order for
//! `$*` without needing the cache at all.

use std::env;

#[derive(Clone)]
pub struct SymbolTable {
    entries: Vec<(String, String)>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// `symtable_add`: if `sym` already names a process environment
    /// variable, update that instead of the local table.
    pub fn add(&mut self, sym: &str, data: &str) {
        if env::var_os(sym).is_some() {
            env::set_var(sym, data);
            return;
        }
        if let Some(entry) = self.entries.iter_mut().find(|(name, _)| name == sym) {
            entry.1 = data.to_string();
        } else {
            self.entries.push((sym.to_string(), data.to_string()));
        }
    }

    /// `symtable_get`: process environment takes priority over the local
    /// table.
    pub fn get(&self, sym: &str) -> Option<String> {
        if let Ok(v) = env::var(sym) {
            return Some(v);
        }
        self.entries.iter().find(|(name, _)| name == sym).map(|(_, v)| v.clone())
    }

    /// `symtable_remove`.
    pub fn remove(&mut self, sym: &str) {
        if env::var_os(sym).is_some() {
            env::remove_var(sym);
            return;
        }
        self.entries.retain(|(name, _)| name != sym);
    }

    /// `symtable_numeric`: every local entry whose name parses as a plain
    /// decimal integer, in insertion order (used for `$*`/positional
    /// parameter expansion). Process-environment variables are never
    /// numerically named in practice and are not considered here.
    pub fn numeric_entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|(name, _)| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
            .cloned()
            .collect()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get_roundtrip() {
        let mut t = SymbolTable::new();
        t.add("FOO", "bar");
        assert_eq!(t.get("FOO"), Some("bar".to_string()));
    }

    #[test]
    fn remove_clears_entry() {
        let mut t = SymbolTable::new();
        t.add("FOO", "bar");
        t.remove("FOO");
        assert_eq!(t.get("FOO"), None);
    }

    #[test]
    fn numeric_entries_filters_non_numeric_names() {
        let mut t = SymbolTable::new();
        t.add("0", "script.rsh");
        t.add("1", "arg-one");
        t.add("PATH_LOCAL", "/nope");
        let nums = t.numeric_entries();
        assert_eq!(nums.len(), 2);
        assert_eq!(nums[0].0, "0");
        assert_eq!(nums[1].0, "1");
    }
}
