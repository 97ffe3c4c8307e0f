//! Credit-based pacing for the binding sender.

use std::sync::Mutex;

use fedstream_protocol::Credit;
use tokio::sync::Notify;

#[derive(Debug)]
struct CreditState {
    credit: u64,
    unbounded: bool,
    closed: bool,
}

/// The credit counter the peer feeds with `!bind-request` and the sender
/// drains one unit per transmitted row.
///
/// The sender parks in [`acquire`](Self::acquire) while credit is zero and
/// wakes on either a grant or [`close`](Self::close). An unbounded grant
/// (`!bind-request MAX`) means "send fully eagerly"; no further accounting
/// happens after that.
#[derive(Debug)]
pub struct CreditGate {
    state: Mutex<CreditState>,
    notify: Notify,
}

impl CreditGate {
    /// A gate with zero credit: the sender parks until the first grant.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CreditState {
                credit: 0,
                unbounded: false,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CreditState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add credit from a peer grant. Saturates into the unbounded sentinel.
    pub fn grant(&self, credit: Credit) {
        {
            let mut s = self.lock();
            match credit {
                Credit::All => s.unbounded = true,
                Credit::Limited(n) => {
                    s.credit = s.credit.saturating_add(n);
                    if s.credit == u64::MAX {
                        s.unbounded = true;
                    }
                }
            }
        }
        self.notify.notify_waiters();
    }

    /// Consume one credit, waiting for a grant if none is available.
    /// Returns `false` when the gate was closed instead.
    pub async fn acquire(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            {
                let mut s = self.lock();
                if s.closed {
                    return false;
                }
                if s.unbounded {
                    return true;
                }
                if s.credit > 0 {
                    s.credit -= 1;
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Unblock and fail all waiters; subsequent acquires return `false`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Currently available credit (`u64::MAX` once unbounded).
    pub fn available(&self) -> u64 {
        let s = self.lock();
        if s.unbounded {
            u64::MAX
        } else {
            s.credit
        }
    }
}

impl Default for CreditGate {
    fn default() -> Self {
        Self::new()
    }
}
