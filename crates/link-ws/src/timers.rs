use std::{collections::HashMap, time::Duration};

use link_platform::{TimerId, TimerRegistry};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::trace;

/// Timer registry backed by Tokio sleeps.
///
/// Each scheduled timer is a spawned task that sleeps and then sends its id
/// on the fire channel returned by [`TokioTimers::new`]. Cancelling aborts the
/// task. A fire that was already sent before the cancel still arrives, and the
/// owner is expected to ignore it.
#[derive(Debug)]
pub struct TokioTimers {
    last_id: u64,
    started: Instant,
    tasks: HashMap<TimerId, JoinHandle<()>>,
    fired_tx: mpsc::UnboundedSender<TimerId>,
}

impl TokioTimers {
    /// Must be called from within a Tokio runtime before the first `schedule`.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerId>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Self {
                last_id: 0,
                started: Instant::now(),
                tasks: HashMap::new(),
                fired_tx,
            },
            fired_rx,
        )
    }

    fn prune_finished(&mut self) {
        self.tasks.retain(|_, task| !task.is_finished());
    }
}

impl TimerRegistry for TokioTimers {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.prune_finished();
        self.last_id += 1;
        let id = TimerId(self.last_id);
        let fired_tx = self.fired_tx.clone();

        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = fired_tx.send(id);
        });
        trace!(%id, delay_ms = delay.as_millis() as u64, "timer scheduled");
        self.tasks.insert(id, task);
        id
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        let Some(task) = self.tasks.remove(&id) else {
            return false;
        };
        let was_pending = !task.is_finished();
        task.abort();
        was_pending
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn pending(&self) -> usize {
        self.tasks.values().filter(|task| !task.is_finished()).count()
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}
