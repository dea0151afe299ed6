use std::thread::{self, JoinHandle};

use anyhow::Result;
use signal_hook::iterator::{Handle, Signals};
use tracing::info;
use trinity_bus::CancelSignal;

/// Stops the signal thread on drop.
pub struct SignalGuard {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Sets `cancel` on the first SIGINT or SIGTERM.
pub fn install(cancel: CancelSignal) -> Result<SignalGuard> {
    let mut signals = Signals::new([libc::SIGINT, libc::SIGTERM])?;
    let handle = signals.handle();

    let thread = thread::Builder::new()
        .name("watch-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                info!(signal, "shutdown requested");
                trinity_bus::cancel(&cancel);
            }
        })?;

    Ok(SignalGuard {
        handle,
        thread: Some(thread),
    })
}
