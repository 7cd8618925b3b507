//! Run cancellation from Ctrl-C, SIGTERM or a deadline

use launchkit::CancelToken;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const POLL: Duration = Duration::from_millis(100);

#[cfg(unix)]
extern "C" fn on_signal(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers that only set a flag
#[cfg(unix)]
fn install_handlers() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

#[cfg(not(unix))]
fn install_handlers() {
    log::debug!("Signal handling is not available on this platform");
}

/// Cancel `token` on interrupt, or once `deadline` has elapsed.
///
/// The watcher thread exits when the token is cancelled by anyone.
pub fn watch(token: &CancelToken, deadline: Option<Duration>) {
    install_handlers();

    let token = token.clone();
    let deadline = deadline.map(|d| Instant::now() + d);
    thread::spawn(move || {
        while !token.is_cancelled() {
            if INTERRUPTED.load(Ordering::SeqCst) {
                log::warn!("Interrupted, cancelling remaining targets");
                token.cancel();
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::warn!("Deadline reached, cancelling remaining targets");
                token.cancel();
                break;
            }
            thread::sleep(POLL);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_cancels_token() {
        let token = CancelToken::new();
        watch(&token, Some(Duration::from_millis(50)));
        assert!(!token.wait_for(Duration::from_secs(5)));
        assert!(token.is_cancelled());
    }
}
