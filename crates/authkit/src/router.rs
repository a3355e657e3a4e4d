//! Keyed fan-out of notifications.
//!
//! Subscribers register for one action name and only receive values
//! published under that name. Closed receivers are pruned on publish.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

pub struct SignalRouter<T> {
    routes: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T: Clone> SignalRouter<T> {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, key: &str) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.entry(key.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver `value` to every live subscriber of `key`. Returns how many
    /// subscribers received it.
    pub fn publish(&self, key: &str, value: T) -> usize {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(senders) = routes.get_mut(key) else {
            return 0;
        };
        senders.retain(|tx| tx.send(value.clone()).is_ok());
        let delivered = senders.len();
        if delivered == 0 {
            routes.remove(key);
        }
        delivered
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes
            .get(key)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }
}

impl<T: Clone> Default for SignalRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}
