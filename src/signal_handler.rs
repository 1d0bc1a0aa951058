use std::io;
use std::thread;

use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tracing::{debug, info};

use crate::schedule::shutdown::ShutdownToken;

/// Cancels `token` on SIGINT/SIGTERM. Later signals are ignored.
pub fn signal_handler(token: &ShutdownToken) -> io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let token = token.clone();
    thread::spawn(move || {
        for signal in signals.forever() {
            if token.cancel() {
                info!(signal, "shutdown signal received, stopping scheduler");
            } else {
                debug!(signal, "shutdown already in progress");
            }
        }
    });
    Ok(())
}
