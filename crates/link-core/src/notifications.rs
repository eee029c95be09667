use std::{sync::Arc, time::Duration};

use link_platform::{TimerId, TimerRegistry};
use tracing::{debug, trace};

use crate::{
    subscribers::{CallbackList, SubscriptionId},
    types::{
        NotificationChange, NotificationDefaults, NotificationId, NotificationKind,
        NotificationRecord, RaiseOptions,
    },
};

/// Default auto-expiry for non-error notices.
pub const DEFAULT_EXPIRY_MS: u64 = 6_000;

#[derive(Debug)]
struct Entry {
    record: NotificationRecord,
    timer: Option<TimerId>,
}

/// Ordered registry of live notifications with per-record expiry timers.
///
/// Every path that removes a record cancels its timer first. Timer fires that
/// no longer match a live record are ignored.
#[derive(Debug)]
pub struct NotificationScheduler<R: TimerRegistry> {
    timers: R,
    defaults: NotificationDefaults,
    entries: Vec<Entry>,
    last_id: u64,
    listeners: CallbackList<NotificationChange>,
}

impl<R: TimerRegistry> NotificationScheduler<R> {
    pub fn new(timers: R) -> Self {
        Self::with_defaults(timers, NotificationDefaults::default())
    }

    pub fn with_defaults(timers: R, defaults: NotificationDefaults) -> Self {
        Self {
            timers,
            defaults,
            entries: Vec::new(),
            last_id: 0,
            listeners: CallbackList::default(),
        }
    }

    /// Insert a notification at the tail and arm its expiry timer.
    ///
    /// `Error` notices default to pinned with no expiry; every other kind
    /// defaults to the configured expiry.
    pub fn raise(
        &mut self,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        options: RaiseOptions,
    ) -> NotificationId {
        let (default_expiry_ms, default_pinned) = match kind {
            NotificationKind::Error => (0, true),
            _ => (self.defaults.expiry_ms, false),
        };

        self.last_id += 1;
        let id = NotificationId(self.last_id);
        let record = NotificationRecord {
            id,
            kind,
            title: title.into(),
            body: body.into(),
            actions: options.actions,
            created_at_ms: self.timers.now_ms(),
            pinned: options.pinned.unwrap_or(default_pinned),
            expiry_ms: options.expiry_ms.unwrap_or(default_expiry_ms),
        };

        let timer = self.arm(&record);
        debug!(%id, ?kind, pinned = record.pinned, expiry_ms = record.expiry_ms, "notification raised");
        self.entries.push(Entry { record, timer });
        self.notify(NotificationChange::Raised(id));
        id
    }

    pub fn show_success(&mut self, title: impl Into<String>, body: impl Into<String>) -> NotificationId {
        self.raise(NotificationKind::Success, title, body, RaiseOptions::default())
    }

    pub fn show_warning(&mut self, title: impl Into<String>, body: impl Into<String>) -> NotificationId {
        self.raise(NotificationKind::Warning, title, body, RaiseOptions::default())
    }

    pub fn show_info(&mut self, title: impl Into<String>, body: impl Into<String>) -> NotificationId {
        self.raise(NotificationKind::Info, title, body, RaiseOptions::default())
    }

    pub fn show_error(&mut self, title: impl Into<String>, body: impl Into<String>) -> NotificationId {
        self.raise(NotificationKind::Error, title, body, RaiseOptions::default())
    }

    /// Remove a notification. Unknown or already-dismissed ids are a no-op.
    ///
    /// Returns `true` when a record was removed.
    pub fn dismiss(&mut self, id: NotificationId) -> bool {
        let Some(index) = self.position(id) else {
            trace!(%id, "dismiss of unknown notification");
            return false;
        };

        if let Some(timer) = self.entries[index].timer.take() {
            self.timers.cancel(timer);
        }
        self.entries.remove(index);
        debug!(%id, "notification dismissed");
        self.notify(NotificationChange::Dismissed(id));
        true
    }

    /// Flip the pinned flag.
    ///
    /// Pinning cancels the expiry timer. Unpinning arms a fresh timer for the
    /// full expiry window, measured from now. Returns the new pinned state, or
    /// `None` for an unknown id.
    pub fn toggle_pin(&mut self, id: NotificationId) -> Option<bool> {
        let index = self.position(id)?;
        let entry = &mut self.entries[index];

        if let Some(timer) = entry.timer.take() {
            self.timers.cancel(timer);
        }
        entry.record.pinned = !entry.record.pinned;
        if !entry.record.pinned && entry.record.expiry_ms > 0 {
            entry.timer = Some(
                self.timers
                    .schedule(Duration::from_millis(entry.record.expiry_ms)),
            );
        }

        let pinned = entry.record.pinned;
        debug!(%id, pinned, "notification pin toggled");
        self.notify(NotificationChange::PinToggled { id, pinned });
        Some(pinned)
    }

    /// Cancel every timer and remove every notification, pinned or not.
    pub fn clear_all(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        for entry in &mut self.entries {
            if let Some(timer) = entry.timer.take() {
                self.timers.cancel(timer);
            }
        }
        let removed = self.entries.len();
        self.entries.clear();
        debug!(removed, "notifications cleared");
        self.notify(NotificationChange::Cleared);
    }

    /// Snapshot of live notifications, oldest first.
    pub fn list(&self) -> Vec<NotificationRecord> {
        self.entries.iter().map(|entry| entry.record.clone()).collect()
    }

    pub fn get(&self, id: NotificationId) -> Option<&NotificationRecord> {
        self.entries
            .iter()
            .find(|entry| entry.record.id == id)
            .map(|entry| &entry.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records with an armed expiry timer.
    pub fn live_timers(&self) -> usize {
        self.entries.iter().filter(|entry| entry.timer.is_some()).count()
    }

    /// Feed a timer fire. Returns `true` when it expired one of our records.
    pub fn handle_timer(&mut self, timer: TimerId) -> bool {
        let Some(id) = self
            .entries
            .iter()
            .find(|entry| entry.timer == Some(timer))
            .map(|entry| entry.record.id)
        else {
            return false;
        };

        trace!(%id, %timer, "notification expired");
        self.dismiss(id)
    }

    /// Subscribe to collection changes.
    pub fn on_change<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&NotificationChange) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(callback))
    }

    pub fn off_change(&mut self, id: SubscriptionId) -> bool {
        self.listeners.remove(id)
    }

    fn arm(&mut self, record: &NotificationRecord) -> Option<TimerId> {
        if record.pinned || record.expiry_ms == 0 {
            return None;
        }
        Some(self.timers.schedule(Duration::from_millis(record.expiry_ms)))
    }

    fn position(&self, id: NotificationId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.record.id == id)
    }

    fn notify(&self, change: NotificationChange) {
        self.listeners.dispatch(&change);
    }
}
