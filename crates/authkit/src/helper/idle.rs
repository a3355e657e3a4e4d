//! Idle shutdown timer.
//!
//! A helper exits after it has been idle for the configured timeout. The
//! timer is paused while an action is in flight and re-armed when the last
//! one finishes.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct TimerState {
    in_flight: u32,
    deadline: Option<Instant>,
}

#[derive(Debug)]
pub struct IdleTimer {
    timeout: Option<Duration>,
    state: watch::Sender<TimerState>,
}

impl IdleTimer {
    /// A zero timeout disables idle shutdown.
    pub fn new(timeout: Duration) -> Self {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        let (state, _) = watch::channel(TimerState {
            in_flight: 0,
            deadline: None,
        });
        Self { timeout, state }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Arm the timer from now; no effect while an action is in flight.
    pub fn touch(&self) {
        let deadline = self.next_deadline();
        self.state.send_modify(|s| {
            if s.in_flight == 0 {
                s.deadline = deadline;
            }
        });
    }

    pub fn pause(&self) {
        self.state.send_modify(|s| {
            s.in_flight += 1;
            s.deadline = None;
        });
    }

    pub fn resume(&self) {
        let deadline = self.next_deadline();
        self.state.send_modify(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            if s.in_flight == 0 {
                s.deadline = deadline;
            }
        });
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().in_flight > 0
    }

    /// Resolves once the timer is armed and its deadline passes without
    /// being moved. Never resolves when disabled.
    pub async fn expired(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let deadline = rx.borrow_and_update().deadline;
            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => return,
                        _ = rx.changed() => {}
                    }
                }
                None => {
                    if rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| Instant::now() + t)
    }
}
