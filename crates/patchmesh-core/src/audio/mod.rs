//! JACK hosting for the patch bay, mixer and monitor nodes
//!
//! Everything in here talks to a live server and is only built on Linux
//! with the `jack-backend` feature. The kernels it drives live in
//! [`crate::engine`] and the graph it feeds in [`crate::graph`].
//!
//! # Threads
//!
//! - **Notification thread**: encodes graph changes into the event channel
//! - **Process thread**: runs the mixer/monitor kernel over port buffers
//! - **Control thread**: owns the graph model, gains and node lifetimes
//!
//! # Example Usage
//!
//! ```ignore
//! use patchmesh_core::audio::{start_patchbay, MixerNode};
//!
//! let mut patchbay = start_patchbay(&config)?;
//! patchbay.resync(&mut observer);
//!
//! let mixer = MixerNode::start("Bus A", &NodeDescriptor::mixer(PortKind::Audio, 4, 2))?;
//! mixer.set_gain(0, 0, GAIN_UNITY);
//!
//! patchbay.run(&mut observer);
//! mixer.close()?;
//! ```

#[cfg(target_os = "linux")]
#[cfg_attr(not(feature = "jack-backend"), allow(dead_code))]
mod cycle;
mod error;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod jack_backend;
#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod monitor_process;
#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod nodes;

pub use error::{AudioError, AudioResult};

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_backend::{start_patchbay, JackServer, PatchbayHandle};
#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use monitor_process::{run_monitor_process, start_monitor_process, MonitorProcessHandle};
#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use nodes::{MixerNode, MonitorNode};
