// src/cancel.rs

//! Cooperative cancellation.
//!
//! A termination signal is the only external control input. The handler does
//! nothing except flip an atomic flag; all resource release happens on the
//! regular control path when the Presenting hold observes the flag. Nothing
//! here is called from signal context except [`CancelToken::cancel`], which
//! is a single atomic store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::debug;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use once_cell::sync::OnceCell;

/// Shared cancellation flag, checked at the Presenting hold.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

static SIGNAL_TOKEN: OnceCell<CancelToken> = OnceCell::new();

extern "C" fn handle_termination(_signo: libc::c_int) {
    if let Some(token) = SIGNAL_TOKEN.get() {
        token.cancel();
    }
}

/// Routes SIGINT and SIGTERM to the given token. May be called once per
/// process.
pub fn install_signal_handler(token: CancelToken) -> Result<()> {
    SIGNAL_TOKEN
        .set(token)
        .map_err(|_| anyhow!("signal handler already installed"))?;

    let action = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
    }
    debug!("termination signal handler installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn token_starts_clear_and_latches() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());

        // A second cancel is a no-op, not an error.
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
