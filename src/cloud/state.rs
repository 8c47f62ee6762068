use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudPhase {
    Uninitialized,
    Initializing,
    SignedOut,
    SignedIn,
    /// Initialization failed; operations stay disabled.
    Error,
}

/// Snapshot handed to observers and to `CloudBackup::state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudState {
    pub phase: CloudPhase,
    pub is_signed_in: bool,
    pub is_initialized: bool,
    pub user_email: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Default for CloudState {
    fn default() -> Self {
        Self {
            phase: CloudPhase::Uninitialized,
            is_signed_in: false,
            is_initialized: false,
            user_email: None,
            last_sync_time: None,
            error: None,
        }
    }
}

impl CloudState {
    pub(crate) fn enter(&mut self, phase: CloudPhase) {
        self.phase = phase;
        self.is_signed_in = phase == CloudPhase::SignedIn;
        self.is_initialized = matches!(phase, CloudPhase::SignedIn | CloudPhase::SignedOut);
        if !self.is_signed_in {
            self.user_email = None;
        }
    }
}

type Callback = Arc<dyn Fn(&CloudState) + Send + Sync>;

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

/// Subscriber callbacks owned by one client, invoked in subscription order.
#[derive(Default, Clone)]
pub struct Observers {
    list: Arc<Mutex<ObserverList>>,
}

impl Observers {
    pub fn register<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CloudState) + Send + Sync + 'static,
    {
        let mut guard = match self.list.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = guard.next_id;
        guard.next_id += 1;
        guard.entries.push((id, Arc::new(callback)));
        Subscription {
            id,
            list: Arc::downgrade(&self.list),
        }
    }

    pub fn notify(&self, state: &CloudState) {
        // Callbacks run outside the lock so they may unsubscribe themselves.
        let callbacks: Vec<Callback> = match self.list.lock() {
            Ok(guard) => guard.entries.iter().map(|(_, cb)| cb.clone()).collect(),
            Err(e) => {
                warn!("Observer list poisoned: {}", e);
                return;
            }
        };
        for callback in callbacks {
            callback(state);
        }
    }

    pub fn len(&self) -> usize {
        self.list.lock().map(|guard| guard.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Disposer returned by `subscribe`. Dropping it keeps the subscription.
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: u64,
    list: Weak<Mutex<ObserverList>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(list) = self.list.upgrade() {
            if let Ok(mut guard) = list.lock() {
                guard.entries.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_keeps_flags_consistent() {
        let mut state = CloudState::default();
        state.user_email = Some("owner@acesnooker.ie".into());
        state.enter(CloudPhase::SignedIn);
        assert!(state.is_signed_in && state.is_initialized);
        assert_eq!(state.user_email.as_deref(), Some("owner@acesnooker.ie"));

        state.enter(CloudPhase::SignedOut);
        assert!(!state.is_signed_in && state.is_initialized);
        assert!(state.user_email.is_none());

        state.enter(CloudPhase::Error);
        assert!(!state.is_initialized);
    }

    #[test]
    fn notify_in_order_and_unsubscribe() {
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first_seen = seen.clone();
        let first = observers.register(move |_| first_seen.lock().unwrap().push("first"));
        let second_seen = seen.clone();
        let _second = observers.register(move |_| second_seen.lock().unwrap().push("second"));

        observers.notify(&CloudState::default());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);

        first.unsubscribe();
        assert_eq!(observers.len(), 1);
        observers.notify(&CloudState::default());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "second"]);
    }
}
