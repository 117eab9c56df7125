// src/main.rs

use std::time::Duration;

use anyhow::{bail, Context};
use log::{error, info};

use scanout::cancel::{install_signal_handler, CancelToken};
use scanout::catalog::ResourceCatalog;
use scanout::config::CONFIG;
use scanout::device::drm::DrmDevice;
use scanout::report;
use scanout::supervisor::{SessionSupervisor, SurfaceOptions};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let config = &*CONFIG;
    let token = CancelToken::new();
    install_signal_handler(token.clone())
        .context("failed to install termination signal handler")?;

    let dev = DrmDevice::open(&config.device.path)
        .with_context(|| format!("cannot use display device {}", config.device.path.display()))?;
    let catalog = ResourceCatalog::enumerate(&dev).context("display resources unavailable")?;

    report::log_inventory(&dev, &catalog);

    let options = SurfaceOptions {
        format: config.surface.format,
        fill_color: config.surface.fill_color,
        poll_interval: Duration::from_millis(config.surface.poll_interval_ms),
    };
    let exit = SessionSupervisor::new(&dev, &catalog, token, options).run();

    for skip in &exit.skipped {
        info!("skipped {}: {}", skip.connector, skip.reason);
    }
    if !exit.teardown_failures.is_empty() {
        for failure in &exit.teardown_failures {
            error!("teardown: {}", failure);
        }
        bail!(
            "{} restoration step(s) failed; display state may be inconsistent",
            exit.teardown_failures.len()
        );
    }
    if exit.started == 0 {
        bail!("no display session could be started");
    }

    info!(
        "restored {} display(s), {} connector(s) skipped",
        exit.started,
        exit.skip_count()
    );
    Ok(())
}
