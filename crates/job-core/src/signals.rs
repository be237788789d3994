//! Termination signal handling for the long-lived daemons.
//!
//! A termination signal is caught once so the daemon can clean up, then the
//! default disposition is restored and the signal re-raised. A second signal
//! (or the re-raised one) therefore terminates the process as usual.

use nix::sys::signal::{self, SigHandler, Signal};
use tokio::signal::unix::{signal as unix_signal, SignalKind};

/// Wait for the first SIGINT or SIGTERM.
pub async fn wait_for_termination() -> std::io::Result<Signal> {
    let mut interrupt = unix_signal(SignalKind::interrupt())?;
    let mut terminate = unix_signal(SignalKind::terminate())?;

    let received = tokio::select! {
        _ = interrupt.recv() => Signal::SIGINT,
        _ = terminate.recv() => Signal::SIGTERM,
    };

    tracing::info!(signal = %received, "Termination signal received");
    Ok(received)
}

/// Restore the default handler for `sig` and deliver it to this process.
pub fn redeliver(sig: Signal) -> nix::Result<()> {
    // SAFETY: installing SIG_DFL does not run any Rust code in signal context.
    unsafe {
        signal::signal(sig, SigHandler::SigDfl)?;
    }
    signal::raise(sig)
}
