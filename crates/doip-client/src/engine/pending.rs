//! Outstanding exchanges tracked by the engine
//!
//! Every wait owns a oneshot sender, so it is resolved at most once by
//! construction. Dropping a wait without resolving it is reported to the
//! caller as a stopped engine.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ClientError, Result};

/// `None` when there is no timeout or it lies beyond what `Instant` can hold
pub(super) fn deadline_after(now: Instant, timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| now.checked_add(t))
}

pub(super) struct ActivationWait {
    pub deadline: Option<Instant>,
    pub reply: oneshot::Sender<Result<()>>,
}

pub(super) struct AckWait {
    pub deadline: Option<Instant>,
    pub reply: oneshot::Sender<Result<()>>,
}

pub(super) struct ReceiveWait {
    pub deadline: Option<Instant>,
    /// Timeout the caller asked for, reapplied on every response pending
    pub timeout: Option<Duration>,
    pub reply: oneshot::Sender<Result<Vec<u8>>>,
}

impl ReceiveWait {
    /// Restart the timer after a response pending, allowing at least `p2_star`
    pub fn extend(&mut self, now: Instant, p2_star: Duration) {
        if let Some(timeout) = self.timeout {
            self.deadline = deadline_after(now, Some(timeout.max(p2_star)));
        }
    }

    /// Account for a response pending that arrived at `pending_at`, before
    /// this wait was registered
    pub fn extend_from(&mut self, pending_at: Instant, p2_star: Duration) {
        let extended = deadline_after(pending_at, Some(p2_star));
        self.deadline = match (self.deadline, extended) {
            (Some(own), Some(extended)) => Some(own.max(extended)),
            (None, _) | (_, None) => None,
        };
    }
}

pub(super) struct Collection {
    pub deadline: Instant,
    pub frames: Vec<Vec<u8>>,
    pub reply: oneshot::Sender<Result<Vec<Vec<u8>>>>,
}

/// Deliver `result`; a caller that gave up is not an error
pub(super) fn resolve<T>(reply: oneshot::Sender<Result<T>>, result: Result<T>) {
    let _ = reply.send(result);
}

pub(super) fn fail<T>(reply: oneshot::Sender<Result<T>>, err: &ClientError) {
    resolve(reply, Err(err.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_uses_larger_of_timeout_and_p2_star() {
        let (reply, _rx) = oneshot::channel();
        let now = Instant::now();
        let mut wait = ReceiveWait {
            deadline: deadline_after(now, Some(Duration::from_millis(200))),
            timeout: Some(Duration::from_millis(200)),
            reply,
        };

        wait.extend(now, Duration::from_millis(300));
        assert_eq!(wait.deadline, Some(now + Duration::from_millis(300)));

        wait.extend(now, Duration::from_millis(50));
        assert_eq!(wait.deadline, Some(now + Duration::from_millis(200)));
    }

    #[test]
    fn test_huge_timeout_means_no_deadline() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Some(Duration::MAX)), None);

        let (reply, _rx) = oneshot::channel();
        let mut wait = ReceiveWait {
            deadline: deadline_after(now, Some(Duration::from_millis(100))),
            timeout: Some(Duration::MAX),
            reply,
        };
        wait.extend(now, Duration::from_secs(5));
        assert_eq!(wait.deadline, None);
    }

    #[test]
    fn test_extend_from_earlier_pending() {
        let pending_at = Instant::now();
        let now = pending_at + Duration::from_millis(50);
        let (reply, _rx) = oneshot::channel();
        let mut wait = ReceiveWait {
            deadline: deadline_after(now, Some(Duration::from_millis(300))),
            timeout: Some(Duration::from_millis(300)),
            reply,
        };

        wait.extend_from(pending_at, Duration::from_secs(2));
        assert_eq!(wait.deadline, Some(pending_at + Duration::from_secs(2)));

        // A pending that is long past does not shorten the wait
        let later = pending_at + Duration::from_secs(10);
        wait.deadline = deadline_after(later, Some(Duration::from_millis(300)));
        wait.extend_from(pending_at, Duration::from_secs(2));
        assert_eq!(wait.deadline, Some(later + Duration::from_millis(300)));
    }

    #[test]
    fn test_unbounded_wait_stays_unbounded() {
        let (reply, _rx) = oneshot::channel();
        let mut wait = ReceiveWait {
            deadline: None,
            timeout: None,
            reply,
        };
        wait.extend(Instant::now(), Duration::from_secs(5));
        assert_eq!(wait.deadline, None);
    }
}
