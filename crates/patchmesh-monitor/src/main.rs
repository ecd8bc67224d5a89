//! patchmesh-monitor - out-of-process level monitor
//!
//! Runs one JACK client with `sink_NN` ports and publishes their levels in
//! a shared-memory segment named after the client. It exits when the host
//! closes the segment, the server shuts down, or on SIGINT/SIGTERM.
//!
//! ## Usage
//!
//! `patchmesh-monitor [CONFIG]`, where CONFIG defaults to
//! `<config dir>/patchmesh/monitor.yaml`.

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
fn main() -> anyhow::Result<()> {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use anyhow::Context;
    use patchmesh_core::audio::start_monitor_process;
    use patchmesh_core::config::{default_config_path, load_config, MonitorConfig, MONITOR_CONFIG_FILE};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("patchmesh-monitor starting up");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path(MONITOR_CONFIG_FILE));
    let config: MonitorConfig = load_config(&config_path);

    let monitor = start_monitor_process(&config).context("Failed to start monitor")?;

    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let waker = monitor.waker();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
        waker.wake();
    })
    .context("Failed to install signal handler")?;

    monitor.run(&done).context("Monitor failed")?;
    log::info!("patchmesh-monitor stopped");
    Ok(())
}

#[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
fn main() {
    eprintln!("patchmesh-monitor needs Linux and the jack-backend feature");
    std::process::exit(1);
}
