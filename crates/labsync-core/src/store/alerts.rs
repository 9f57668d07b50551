// ── Alert log ──
//
// Most-recent-first, bounded. Alerts have no per-entity update path, so
// this is a plain sequence rather than an `EntityCollection`.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;

use crate::model::Alert;

/// Maximum number of alerts retained; the oldest are evicted first.
pub const ALERT_CAPACITY: usize = 50;

pub struct AlertLog {
    entries: VecDeque<Arc<Alert>>,
    snapshot: watch::Sender<Arc<Vec<Arc<Alert>>>>,
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertLog {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entries: VecDeque::with_capacity(ALERT_CAPACITY),
            snapshot,
        }
    }

    /// Insert at the head, evicting from the tail past capacity.
    pub fn push(&mut self, alert: Alert) -> Arc<Alert> {
        let alert = Arc::new(alert);
        self.entries.push_front(Arc::clone(&alert));
        self.entries.truncate(ALERT_CAPACITY);
        self.changed();
        alert
    }

    /// Remove by position (0 is the newest). Out of range is `None`.
    pub fn remove(&mut self, index: usize) -> Option<Arc<Alert>> {
        let removed = self.entries.remove(index)?;
        self.changed();
        Some(removed)
    }

    /// Replace the whole sequence. `alerts` is in server order, oldest
    /// first; the log ends up newest first as usual.
    pub fn replace_all(&mut self, alerts: impl IntoIterator<Item = Alert>) {
        self.entries.clear();
        for alert in alerts {
            self.entries.push_front(Arc::new(alert));
            self.entries.truncate(ALERT_CAPACITY);
        }
        self.changed();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.changed();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Alert>> {
        self.entries.get(index)
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Alert>> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<Alert>>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<Alert>>>> {
        self.snapshot.subscribe()
    }

    fn changed(&self) {
        let values: Vec<Arc<Alert>> = self.entries.iter().cloned().collect();
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
