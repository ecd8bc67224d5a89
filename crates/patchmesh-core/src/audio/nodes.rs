//! Mixer and monitor nodes hosted as their own JACK clients
//!
//! Each node is one client whose process callback runs a kernel from
//! [`crate::engine`] over its port buffers. The control thread talks to a
//! running node only through atomics (gains in, levels out).

use std::sync::Arc;

use jack::{AudioIn, AudioOut, Client, Control, MidiIn, MidiOut, Port, ProcessScope};

use super::cycle::{stage_audio, stage_midi, LevelTarget};
use super::error::{AudioError, AudioResult};
use super::jack_backend::open_client;
use crate::engine::{GainMatrix, LevelMeter, MeterScale, PublishedLevels};
use crate::session::NodeDescriptor;
use crate::types::PortKind;

/// `in_01`, `out_02`, `sink_03`, ...
fn channel_port_name(prefix: &str, index: usize) -> String {
    format!("{}_{:02}", prefix, index + 1)
}

fn register_ports<PS: jack::PortSpec + Default>(
    client: &Client,
    prefix: &str,
    count: usize,
) -> AudioResult<Vec<Port<PS>>> {
    (0..count)
        .map(|index| {
            let name = channel_port_name(prefix, index);
            client
                .register_port(&name, PS::default())
                .map_err(|e| AudioError::PortRegistration {
                    name,
                    reason: e.to_string(),
                })
        })
        .collect()
}

fn unregister_ports<PS>(client: &Client, ports: Vec<Port<PS>>) {
    for port in ports {
        if let Err(e) = client.unregister_port(port) {
            log::warn!("Failed to unregister port: {}", e);
        }
    }
}

pub(super) fn deactivate<N, P>(client: jack::AsyncClient<N, P>) -> AudioResult<(Client, P)>
where
    N: 'static + Send + Sync + jack::NotificationHandler,
    P: 'static + Send + jack::ProcessHandler,
{
    let name = client.as_client().name().to_string();
    let (client, _notifications, process) = client
        .deactivate()
        .map_err(|e| AudioError::Activation(name.clone(), e.to_string()))?;
    log::info!("JACK client '{}' deactivated", name);
    Ok((client, process))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Mixer
// ═══════════════════════════════════════════════════════════════════════════════

enum MixerPorts {
    Audio {
        inputs: Vec<Port<AudioIn>>,
        outputs: Vec<Port<AudioOut>>,
    },
    Midi {
        inputs: Vec<Port<MidiIn>>,
        outputs: Vec<Port<MidiOut>>,
    },
}

/// Mixer process handler
///
/// Buffer pointers are gathered into fixed arrays on the stack; nothing
/// allocates in the callback.
struct MixerProcess {
    ports: MixerPorts,
    gains: Arc<GainMatrix>,
}

impl jack::ProcessHandler for MixerProcess {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        match &mut self.ports {
            MixerPorts::Audio { inputs, outputs } => stage_audio(
                &self.gains,
                inputs.iter().map(|port| port.as_slice(ps)),
                outputs.iter_mut().map(|port| port.as_mut_slice(ps)),
            ),
            MixerPorts::Midi { inputs, outputs } => stage_midi(
                &self.gains,
                inputs.iter().map(|port| port.iter(ps).peekable()),
                outputs.iter_mut().map(|port| port.writer(ps)),
            ),
        }
        Control::Continue
    }
}

/// N×M mixer client
pub struct MixerNode {
    client: jack::AsyncClient<(), MixerProcess>,
    kind: PortKind,
    sources: usize,
    sinks: usize,
    gains: Arc<GainMatrix>,
}

impl MixerNode {
    /// Open a mixer client with `in_NN` / `out_NN` ports
    ///
    /// Gains come from the descriptor; without any, input `k` feeds output
    /// `k` at unity.
    pub fn start(name: &str, descriptor: &NodeDescriptor) -> AudioResult<Self> {
        let descriptor = descriptor.clone().clamped();
        let client = open_client(name, None)?;

        let ports = if descriptor.kind.is_sampled() {
            MixerPorts::Audio {
                inputs: register_ports(&client, "in", descriptor.sources)?,
                outputs: register_ports(&client, "out", descriptor.sinks)?,
            }
        } else {
            MixerPorts::Midi {
                inputs: register_ports(&client, "in", descriptor.sources)?,
                outputs: register_ports(&client, "out", descriptor.sinks)?,
            }
        };

        let gains = if descriptor.gains.is_empty() {
            GainMatrix::identity(descriptor.sources.min(descriptor.sinks))
        } else {
            let gains = GainMatrix::new();
            gains.load(&descriptor.gains);
            gains
        };
        let gains = Arc::new(gains);

        let client_name = client.name().to_string();
        let client = client
            .activate_async(
                (),
                MixerProcess {
                    ports,
                    gains: Arc::clone(&gains),
                },
            )
            .map_err(|e| AudioError::Activation(client_name.clone(), e.to_string()))?;

        log::info!(
            "Mixer '{}' started ({} {}x{})",
            client_name,
            descriptor.kind,
            descriptor.sources,
            descriptor.sinks
        );

        Ok(Self {
            client,
            kind: descriptor.kind,
            sources: descriptor.sources,
            sinks: descriptor.sinks,
            gains,
        })
    }

    pub fn client_name(&self) -> &str {
        self.client.as_client().name()
    }

    /// Gain of `source` into `sink`, hundredths of a dB
    pub fn gain(&self, sink: usize, source: usize) -> i32 {
        self.gains.get(sink, source)
    }

    /// Set a gain; picked up by the next process cycle
    pub fn set_gain(&self, sink: usize, source: usize, centi_db: i32) {
        self.gains.set(sink, source, centi_db);
    }

    /// Session state of the running node
    pub fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            name: Some(self.client_name().to_string()),
            gains: self.gains.snapshot(self.sources, self.sinks),
            ..NodeDescriptor::mixer(self.kind, self.sources, self.sinks)
        }
    }

    /// Deactivate, then unregister the ports (control thread only)
    pub fn close(self) -> AudioResult<()> {
        let (client, process) = deactivate(self.client)?;
        match process.ports {
            MixerPorts::Audio { inputs, outputs } => {
                unregister_ports(&client, inputs);
                unregister_ports(&client, outputs);
            }
            MixerPorts::Midi { inputs, outputs } => {
                unregister_ports(&client, inputs);
                unregister_ports(&client, outputs);
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Monitor
// ═══════════════════════════════════════════════════════════════════════════════

pub(super) enum MonitorPorts {
    Audio(Vec<Port<AudioIn>>),
    Midi(Vec<Port<MidiIn>>),
}

impl MonitorPorts {
    pub(super) fn register(client: &Client, kind: PortKind, channels: usize) -> AudioResult<Self> {
        Ok(if kind.is_sampled() {
            MonitorPorts::Audio(register_ports(client, "sink", channels)?)
        } else {
            MonitorPorts::Midi(register_ports(client, "sink", channels)?)
        })
    }

    pub(super) fn unregister(self, client: &Client) {
        match self {
            MonitorPorts::Audio(ports) => unregister_ports(client, ports),
            MonitorPorts::Midi(ports) => unregister_ports(client, ports),
        }
    }
}

pub(super) struct MonitorProcess {
    pub(super) ports: MonitorPorts,
    meter: LevelMeter,
    target: LevelTarget,
}

impl MonitorProcess {
    pub(super) fn new(ports: MonitorPorts, meter: LevelMeter, target: LevelTarget) -> Self {
        Self {
            ports,
            meter,
            target,
        }
    }
}

impl jack::ProcessHandler for MonitorProcess {
    fn process(&mut self, client: &Client, ps: &ProcessScope) -> Control {
        self.meter.set_sample_rate(client.sample_rate() as u32);
        let nframes = ps.n_frames() as usize;

        match &self.ports {
            MonitorPorts::Audio(ports) => {
                self.target
                    .meter_audio(&mut self.meter, ports.iter().map(|port| port.as_slice(ps)));
            }
            MonitorPorts::Midi(ports) => {
                self.target.meter_midi(
                    &mut self.meter,
                    ports.iter().map(|port| port.iter(ps).peekable()),
                    nframes,
                );
            }
        }
        Control::Continue
    }
}

/// In-process level monitor client
pub struct MonitorNode {
    client: jack::AsyncClient<(), MonitorProcess>,
    kind: PortKind,
    channels: usize,
    levels: Arc<PublishedLevels>,
}

impl MonitorNode {
    /// Open a monitor client with `sink_NN` ports
    pub fn start(name: &str, descriptor: &NodeDescriptor) -> AudioResult<Self> {
        let descriptor = descriptor.clone().clamped();
        let client = open_client(name, None)?;
        let ports = MonitorPorts::register(&client, descriptor.kind, descriptor.sinks)?;

        let scale = MeterScale::for_kind(descriptor.kind);
        let levels = Arc::new(PublishedLevels::new(scale));
        let meter = LevelMeter::new(scale, client.sample_rate() as u32);

        let client_name = client.name().to_string();
        let process = MonitorProcess::new(ports, meter, LevelTarget::Local(Arc::clone(&levels)));
        let client = client
            .activate_async((), process)
            .map_err(|e| AudioError::Activation(client_name.clone(), e.to_string()))?;

        log::info!(
            "Monitor '{}' started ({} x{})",
            client_name,
            descriptor.kind,
            descriptor.sinks
        );

        Ok(Self {
            client,
            kind: descriptor.kind,
            channels: descriptor.sinks,
            levels,
        })
    }

    pub fn client_name(&self) -> &str {
        self.client.as_client().name()
    }

    /// Published level of a channel: hundredths of a dB, or of a velocity
    /// step for MIDI
    pub fn level(&self, channel: usize) -> i32 {
        self.levels.get(channel)
    }

    pub fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::monitor(self.kind, self.channels).with_name(self.client_name())
    }

    /// Deactivate, then unregister the ports (control thread only)
    pub fn close(self) -> AudioResult<()> {
        let (client, process) = deactivate(self.client)?;
        process.ports.unregister(&client);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PORT_MAX;

    #[test]
    fn test_channel_port_names() {
        assert_eq!(channel_port_name("in", 0), "in_01");
        assert_eq!(channel_port_name("sink", 9), "sink_10");
        assert_eq!(channel_port_name("out", PORT_MAX - 1), "out_32");
    }
}
