//! Control thread: drains graph notifications into the model
//!
//! The control loop is the single consumer of the event channel and the only
//! owner of the [`GraphModel`]. Each pass pops every pending record, applies
//! it, and notifies the observer once if anything changed.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::event::{EventReader, GraphEvent, SessionCommand};
use crate::graph::{GraphModel, GraphServer};

/// Redraw hook and session hand-off for whoever presents the graph
pub trait GraphObserver {
    /// Called at most once per drain pass, after the model changed
    fn graph_changed(&mut self, model: &GraphModel);

    /// The session manager asked for a save
    fn session_requested(&mut self, _command: SessionCommand, _model: &GraphModel) {}
}

impl GraphObserver for () {
    fn graph_changed(&mut self, _model: &GraphModel) {}
}

/// Buffer size reported from the process thread
///
/// JACK announces buffer-size changes on the real-time thread, not the
/// notification thread. Parking the value in one atomic keeps the event
/// channel single-producer; the next drain pass turns it into an event.
#[derive(Debug, Default)]
pub struct PendingBufferSize(AtomicU32);

impl PendingBufferSize {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new size (real-time safe)
    #[inline]
    pub fn post(&self, frames: u32) {
        self.0.store(frames, Ordering::Relaxed);
    }

    /// Take the pending size, if one was posted since the last take
    pub fn take(&self) -> Option<u32> {
        match self.0.swap(0, Ordering::Relaxed) {
            0 => None,
            frames => Some(frames),
        }
    }
}

/// Result of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub events: usize,
    pub changed: bool,
    pub quit: bool,
}

pub struct ControlLoop {
    reader: EventReader,
    model: GraphModel,
    done: Arc<AtomicBool>,
    pending_buffer_size: Arc<PendingBufferSize>,
    dropped_seen: u64,
}

impl ControlLoop {
    pub fn new(
        reader: EventReader,
        done: Arc<AtomicBool>,
        pending_buffer_size: Arc<PendingBufferSize>,
    ) -> Self {
        Self {
            reader,
            model: GraphModel::new(),
            done,
            pending_buffer_size,
            dropped_seen: 0,
        }
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut GraphModel {
        &mut self.model
    }

    /// Flag that stops [`run`](Self::run) (set from a signal handler)
    pub fn done_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.done)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    /// Seed the model from the server
    pub fn resync(&mut self, server: &dyn GraphServer, observer: &mut dyn GraphObserver) {
        self.model.full_resync(server);
        self.dropped_seen = self.reader.dropped();
        observer.graph_changed(&self.model);
    }

    /// Apply everything pending; notify the observer once if the model changed
    pub fn drain(
        &mut self,
        server: &dyn GraphServer,
        observer: &mut dyn GraphObserver,
    ) -> DrainStats {
        let mut stats = DrainStats::default();

        if let Some(frames) = self.pending_buffer_size.take() {
            let applied = self.model.apply(&GraphEvent::BufferSize { frames }, server);
            stats.changed |= applied.changed;
        }

        while let Some(event) = self.reader.pop() {
            let applied = self.model.apply(&event, server);
            stats.events += 1;
            stats.changed |= applied.changed;
            stats.quit |= applied.quit;
            if let Some(command) = applied.session {
                observer.session_requested(command, &self.model);
            }
        }

        // Lost notifications leave the model behind the server
        let dropped = self.reader.dropped();
        if dropped > self.dropped_seen {
            log::warn!(
                "{} graph notifications dropped (event channel full), resyncing",
                dropped - self.dropped_seen
            );
            self.dropped_seen = dropped;
            if !stats.quit {
                self.model.full_resync(server);
                stats.changed = true;
            }
        }

        if stats.changed {
            observer.graph_changed(&self.model);
        }
        stats
    }

    /// Drain every `poll` until the done flag is set or a quit is requested
    pub fn run(
        &mut self,
        server: &dyn GraphServer,
        observer: &mut dyn GraphObserver,
        poll: Duration,
    ) {
        log::info!("Control loop started (poll every {:?})", poll);
        while !self.is_done() {
            if self.drain(server, observer).quit {
                self.done.store(true, Ordering::Relaxed);
                break;
            }
            std::thread::sleep(poll);
        }
        self.drain(server, observer);
        log::info!("Control loop stopped");
    }
}
