//! Out-of-process monitor
//!
//! One JACK client with `sink_NN` ports whose levels go into a named
//! shared-memory segment instead of process-local atomics. The control
//! thread just sleeps on the segment's semaphore: a host process, a
//! [`SegmentWaker`] or the server going away posts it to end the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::cycle::LevelTarget;
use super::error::{AudioError, AudioResult};
use super::jack_backend::open_client;
use super::nodes::{deactivate, MonitorPorts, MonitorProcess};
use crate::config::MonitorConfig;
use crate::engine::{LevelMeter, MeterScale};
use crate::shm::{segment_name, SegmentWaker, SharedSegment, WaitResult};

/// Wakes the control thread when the server shuts the client down
struct ShutdownWatch {
    target: LevelTarget,
}

impl jack::NotificationHandler for ShutdownWatch {
    unsafe fn shutdown(&mut self, _status: jack::ClientStatus, _reason: &str) {
        self.target.server_shutdown();
    }
}

/// Running out-of-process monitor
pub struct MonitorProcessHandle {
    client: jack::AsyncClient<ShutdownWatch, MonitorProcess>,
    segment: Arc<SharedSegment>,
    target: LevelTarget,
    poll: Duration,
}

/// Open the monitor client, create its segment and start metering
///
/// The segment is named after the client the server actually granted (see
/// [`segment_name`]).
pub fn start_monitor_process(config: &MonitorConfig) -> AudioResult<MonitorProcessHandle> {
    let client = open_client(&config.client_name, config.server_name.as_deref())?;
    let client_name = client.name().to_string();
    let channels = config.channels();

    let segment = Arc::new(SharedSegment::create(&segment_name(&client_name))?);
    if let Some(shm) = segment.writer() {
        shm.set_channels(channels);
    }

    let ports = MonitorPorts::register(&client, config.kind, channels)?;
    let scale = MeterScale::for_kind(config.kind);
    let meter = LevelMeter::new(scale, client.sample_rate() as u32);
    let target = LevelTarget::shared(Arc::clone(&segment));
    let process = MonitorProcess::new(ports, meter, target.clone());

    let client = client
        .activate_async(
            ShutdownWatch {
                target: target.clone(),
            },
            process,
        )
        .map_err(|e| AudioError::Activation(client_name.clone(), e.to_string()))?;

    log::info!(
        "Monitor '{}' running ({} x{}, segment {})",
        client_name,
        config.kind,
        channels,
        segment_name(&client_name)
    );

    Ok(MonitorProcessHandle {
        client,
        segment,
        target,
        poll: config.poll_interval(),
    })
}

impl MonitorProcessHandle {
    pub fn client_name(&self) -> &str {
        self.client.as_client().name()
    }

    /// Handle that ends [`run`](Self::run) early, e.g. from a signal handler
    pub fn waker(&self) -> SegmentWaker {
        SegmentWaker::new(&self.segment)
    }

    /// Block until `done` is set or the segment is posted, then shut down
    ///
    /// The segment is unlinked on return.
    pub fn run(self, done: &AtomicBool) -> AudioResult<()> {
        let name = self.client_name().to_string();
        if let Some(shm) = self.segment.writer() {
            while !done.load(Ordering::Relaxed) {
                if shm.wait_done(self.poll) == WaitResult::Signaled {
                    log::info!("Monitor '{}' woken", name);
                    break;
                }
            }
        }

        self.target.close();
        let (client, process) = deactivate(self.client)?;
        process.ports.unregister(&client);
        Ok(())
    }
}

/// Run the monitor until `done` is set or the segment is closed
pub fn run_monitor_process(config: &MonitorConfig, done: &AtomicBool) -> AudioResult<()> {
    start_monitor_process(config)?.run(done)
}
