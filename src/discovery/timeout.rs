//! Upstream calls bounded by a timeout
//!
//! The call runs on its own thread and reports back over a channel. On
//! timeout the thread is left to finish on its own and its result is dropped.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::error::UpstreamError;

/// Run `call` with a deadline. A zero timeout runs it inline, unbounded.
pub fn call_with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, UpstreamError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, UpstreamError> + Send + 'static,
{
    if timeout.is_zero() {
        return call();
    }

    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new()
        .name("degrees-upstream".into())
        .spawn(move || {
            // Receiver may be gone after a timeout
            let _ = tx.send(call());
        });

    if let Err(e) = spawned {
        return Err(UpstreamError::Transient(format!("failed to spawn call thread: {}", e)));
    }

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(UpstreamError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(UpstreamError::Transient("upstream call panicked".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_call_returns_value() {
        let result = call_with_timeout(Duration::from_secs(1), || Ok(7));
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_slow_call_times_out() {
        let result: Result<u32, _> = call_with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok(1)
        });
        assert_eq!(result, Err(UpstreamError::Timeout(Duration::from_millis(20))));
    }

    #[test]
    fn test_errors_pass_through() {
        let result: Result<u32, _> = call_with_timeout(Duration::from_secs(1), || {
            Err(UpstreamError::NotFound("nobody".into()))
        });
        assert_eq!(result, Err(UpstreamError::NotFound("nobody".into())));
    }

    #[test]
    fn test_panicking_call_is_transient() {
        let result: Result<u32, _> = call_with_timeout(Duration::from_secs(1), || panic!("boom"));
        assert!(matches!(result, Err(UpstreamError::Transient(_))));
    }
}
