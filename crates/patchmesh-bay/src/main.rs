//! patchmesh-bay - headless JACK patch bay
//!
//! This is the control process. It:
//! 1. Opens the patch-bay JACK client and mirrors the server's graph
//! 2. Starts the mixer and monitor nodes listed in the config
//! 3. Logs graph changes until interrupted or the server goes away
//!
//! ## Usage
//!
//! `patchmesh-bay [CONFIG]`, where CONFIG defaults to
//! `<config dir>/patchmesh/patchbay.yaml`.

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod bay {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::Ordering;

    use anyhow::{Context, Result};

    use patchmesh_core::audio::{start_patchbay, MixerNode, MonitorNode};
    use patchmesh_core::config::{
        config_dir, default_config_path, load_config, PatchConfig, PATCHBAY_CONFIG_FILE,
    };
    use patchmesh_core::control::GraphObserver;
    use patchmesh_core::event::SessionCommand;
    use patchmesh_core::graph::GraphModel;
    use patchmesh_core::session::NodeDescriptor;
    use patchmesh_core::types::Direction;

    /// Owns the hosted nodes and reports graph changes to the log
    struct Bay {
        mixers: Vec<MixerNode>,
        monitors: Vec<MonitorNode>,
        session_dir: PathBuf,
    }

    impl Bay {
        fn save_session(&self) {
            let descriptors = self
                .mixers
                .iter()
                .map(MixerNode::descriptor)
                .chain(self.monitors.iter().map(MonitorNode::descriptor));

            for descriptor in descriptors {
                let file = format!("{}.json", descriptor.name.as_deref().unwrap_or("node"));
                if let Err(e) = descriptor.save(&self.session_dir.join(file)) {
                    log::warn!("{:#}", e);
                }
            }
        }

        fn close(self) {
            for mixer in self.mixers {
                if let Err(e) = mixer.close() {
                    log::warn!("{}", e);
                }
            }
            for monitor in self.monitors {
                if let Err(e) = monitor.close() {
                    log::warn!("{}", e);
                }
            }
        }
    }

    impl GraphObserver for Bay {
        fn graph_changed(&mut self, model: &GraphModel) {
            let status = model.status();
            log::info!(
                "Graph: {} clients, {} ports, {} connections ({} Hz, {} frames, {} xruns)",
                model.client_count(),
                model.port_count(),
                model.connection_count(),
                status.sample_rate,
                status.buffer_size,
                status.xruns
            );

            for client in model.clients() {
                log::debug!(
                    "  {} [{:?}] {} sources, {} sinks",
                    client.display_name(),
                    client.classification(),
                    client.ports(Direction::Source).len(),
                    client.ports(Direction::Sink).len()
                );
            }

            for monitor in &self.monitors {
                let levels: Vec<i32> = (0..monitor.descriptor().sinks)
                    .map(|channel| monitor.level(channel))
                    .collect();
                log::debug!("  {} levels {:?}", monitor.client_name(), levels);
            }
        }

        fn session_requested(&mut self, command: SessionCommand, _model: &GraphModel) {
            log::info!("Session {:?} requested", command);
            self.save_session();
        }
    }

    fn node_name(config: &PatchConfig, descriptor: &NodeDescriptor, role: &str, n: usize) -> String {
        descriptor
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{}-{}", config.client_name, role, n + 1))
    }

    fn start_nodes(config: &PatchConfig, session_dir: PathBuf) -> Bay {
        let mut bay = Bay {
            mixers: Vec::new(),
            monitors: Vec::new(),
            session_dir,
        };

        // A node that can't start is logged and skipped; the bay keeps running
        for (n, descriptor) in config.mixers.iter().enumerate() {
            match MixerNode::start(&node_name(config, descriptor, "mixer", n), descriptor) {
                Ok(mixer) => bay.mixers.push(mixer),
                Err(e) => log::warn!("Mixer not started: {}", e),
            }
        }
        for (n, descriptor) in config.monitors.iter().enumerate() {
            match MonitorNode::start(&node_name(config, descriptor, "monitor", n), descriptor) {
                Ok(monitor) => bay.monitors.push(monitor),
                Err(e) => log::warn!("Monitor not started: {}", e),
            }
        }
        bay
    }

    pub fn run(config_path: &Path) -> Result<()> {
        let config: PatchConfig = load_config(config_path);

        let mut patchbay = start_patchbay(&config).context("Failed to start patch bay")?;
        log::info!("Patch bay '{}' connected", patchbay.client_name());

        let done = patchbay.done_flag();
        ctrlc::set_handler(move || {
            done.store(true, Ordering::Relaxed);
        })
        .context("Failed to install signal handler")?;

        let mut bay = start_nodes(&config, config_dir().join("session"));
        patchbay.resync(&mut bay);
        patchbay.run(&mut bay);

        bay.close();
        patchbay.close()?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        std::env::args()
            .nth(1)
            .map(PathBuf::from)
            .unwrap_or_else(|| default_config_path(PATCHBAY_CONFIG_FILE))
    }
}

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
fn main() -> anyhow::Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("patchmesh-bay starting up");
    bay::run(&bay::config_path())
}

#[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
fn main() {
    eprintln!("patchmesh-bay needs Linux and the jack-backend feature");
    std::process::exit(1);
}
