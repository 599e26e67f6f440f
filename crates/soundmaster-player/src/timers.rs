//! Cancellable one-shot timers that report back to the controller loop.
//!
//! Each kind has at most one armed instance.  Every arm gets a fresh
//! generation number, so an expiry that raced with a cancel or re-arm is
//! recognised as stale and ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::controller::ControllerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Backoff before reopening the current source.
    Retry,
    /// Fires when a play request never produced a `Play` event.
    Watchdog,
    /// Return from a fallback to the primary.
    RestorePrimary,
    /// End of the grace period after an explicit stream switch.
    InitWindow,
}

struct Slot {
    generation: u64,
    handle: AbortHandle,
}

pub struct Timers {
    tx: mpsc::UnboundedSender<ControllerEvent>,
    slots: HashMap<TimerKind, Slot>,
    generation: u64,
}

impl Timers {
    pub fn new(tx: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self {
            tx,
            slots: HashMap::new(),
            generation: 0,
        }
    }

    /// Arm `kind`, replacing any pending instance.  Must be called from
    /// within a tokio runtime.
    pub fn arm(&mut self, kind: TimerKind, delay: Duration) -> u64 {
        self.cancel(kind);
        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ControllerEvent::Timer { kind, generation });
        });
        trace!("timers: armed {:?}#{} for {:?}", kind, generation, delay);
        self.slots.insert(
            kind,
            Slot {
                generation,
                handle: task.abort_handle(),
            },
        );
        generation
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.slots.remove(&kind) {
            Some(slot) => {
                slot.handle.abort();
                trace!("timers: cancelled {:?}#{}", kind, slot.generation);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.handle.abort();
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Accept an expiry.  True only for the currently armed generation, in
    /// which case the slot is cleared.
    pub fn take_fired(&mut self, kind: TimerKind, generation: u64) -> bool {
        match self.slots.get(&kind) {
            Some(slot) if slot.generation == generation => {
                self.slots.remove(&kind);
                true
            }
            _ => false,
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fired(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> Vec<(TimerKind, u64)> {
        let mut out = Vec::new();
        while let Ok(evt) = rx.try_recv() {
            if let ControllerEvent::Timer { kind, generation } = evt {
                out.push((kind, generation));
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        let generation = timers.arm(TimerKind::Retry, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1_999)).await;
        assert!(fired(&mut rx).is_empty());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired(&mut rx), vec![(TimerKind::Retry, generation)]);
        assert!(timers.take_fired(TimerKind::Retry, generation));
        assert!(!timers.is_armed(TimerKind::Retry));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.arm(TimerKind::Watchdog, Duration::from_secs(1));
        assert!(timers.cancel(TimerKind::Watchdog));
        assert!(!timers.cancel(TimerKind::Watchdog));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(fired(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_makes_old_generation_stale() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        let old = timers.arm(TimerKind::RestorePrimary, Duration::from_secs(1));
        let new = timers.arm(TimerKind::RestorePrimary, Duration::from_secs(1));
        assert_ne!(old, new);
        assert!(!timers.take_fired(TimerKind::RestorePrimary, old));
        assert!(timers.is_armed(TimerKind::RestorePrimary));
        assert!(timers.take_fired(TimerKind::RestorePrimary, new));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_every_kind() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.arm(TimerKind::Retry, Duration::from_millis(10));
        timers.arm(TimerKind::InitWindow, Duration::from_millis(10));
        timers.cancel_all();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fired(&mut rx).is_empty());
        assert!(!timers.is_armed(TimerKind::Retry));
    }
}
