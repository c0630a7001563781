//! Dump both token indexes.
//!
//! Usage: `telepyth-list-keys [DATABASE]` (defaults to `$TELEPYTH_DATABASE`,
//! then `telepyth.db`). The service must be stopped: the store is locked
//! while it runs.

use std::{
    env,
    io::{self, Write},
    path::PathBuf,
};

use telepyth_core::store::TokenStore;

fn main() -> telepyth_core::Result<()> {
    let path = env::args_os()
        .nth(1)
        .or_else(|| env::var_os("TELEPYTH_DATABASE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("telepyth.db"));

    let store = TokenStore::open(&path)?;

    let mut out = io::stdout().lock();

    writeln!(out, "Reverse index (user -> token):")?;
    for (user_id, token) in store.reverse_entries()? {
        writeln!(out, "  {user_id} -> {token}")?;
    }

    writeln!(out, "Forward index (token -> user):")?;
    for (token, record) in store.records()? {
        let state = if record.revoked { " (revoked)" } else { "" };
        writeln!(out, "  {token} -> {}{state}", record.user.label())?;
    }

    Ok(())
}
