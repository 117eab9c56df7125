// src/supervisor.rs

//! Drives one session per connected connector from a single catalog.
//!
//! A connector that fails allocation or session start is skipped and
//! recorded; the others proceed. Partial success across multiple displays is
//! expected. One interruption tears down every active session in reverse
//! start order.

use std::fmt;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::allocator::TimingEngineAllocator;
use crate::cancel::CancelToken;
use crate::catalog::ResourceCatalog;
use crate::device::{DeviceError, KmsDevice};
use crate::framebuffer::PixelFormat;
use crate::paint;
use crate::session::{DisplaySession, SessionError};

/// Why a connector did not get a session.
#[derive(Debug)]
pub enum SkipReason {
    Disconnected,
    NoModes,
    NoCompatibleEngine,
    SessionFailed(SessionError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::NoModes => write!(f, "no valid modes"),
            Self::NoCompatibleEngine => write!(f, "no compatible timing engine"),
            Self::SessionFailed(e) => write!(f, "session failed: {}", e),
        }
    }
}

#[derive(Debug)]
pub struct SkippedConnector {
    pub connector: String,
    pub reason: SkipReason,
}

/// What the run did, reported after all sessions are torn down.
#[derive(Debug, Default)]
pub struct ExitReport {
    /// Sessions that reached Presenting.
    pub started: usize,
    pub skipped: Vec<SkippedConnector>,
    /// Restoration sub-steps that failed, across all sessions.
    pub teardown_failures: Vec<DeviceError>,
}

impl ExitReport {
    pub fn skip_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Surface parameters shared by every session of a run.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceOptions {
    pub format: PixelFormat,
    pub fill_color: [u8; 3],
    pub poll_interval: Duration,
}

/// Owns a run: engine allocation, session startup, the Presenting hold, and
/// global reverse-order teardown.
pub struct SessionSupervisor<'a, D: KmsDevice> {
    dev: &'a D,
    catalog: &'a ResourceCatalog,
    token: CancelToken,
    options: SurfaceOptions,
}

impl<'a, D: KmsDevice> SessionSupervisor<'a, D> {
    pub fn new(
        dev: &'a D,
        catalog: &'a ResourceCatalog,
        token: CancelToken,
        options: SurfaceOptions,
    ) -> Self {
        Self {
            dev,
            catalog,
            token,
            options,
        }
    }

    /// Starts sessions for every usable connector, holds until cancelled,
    /// then restores everything. Per-connector failures never abort the
    /// walk; only the catalog (already supplied) could have been fatal.
    pub fn run(&mut self) -> ExitReport {
        let mut report = ExitReport::default();
        let mut allocator = TimingEngineAllocator::new();
        let mut sessions: Vec<DisplaySession<'a, D>> = Vec::new();

        for connector in &self.catalog.connectors {
            let name = connector.display_name();
            if !connector.connected {
                info!("{}: disconnected", name);
                report.skipped.push(SkippedConnector {
                    connector: name,
                    reason: SkipReason::Disconnected,
                });
                continue;
            }
            let Some(mode) = connector.modes.first().cloned() else {
                warn!("{}: connected but has no valid modes", name);
                report.skipped.push(SkippedConnector {
                    connector: name,
                    reason: SkipReason::NoModes,
                });
                continue;
            };
            let engine = match allocator.allocate(connector, self.catalog) {
                Ok(engine) => engine,
                Err(e) => {
                    error!("{}", e);
                    report.skipped.push(SkippedConnector {
                        connector: name,
                        reason: SkipReason::NoCompatibleEngine,
                    });
                    continue;
                }
            };

            let mut session =
                DisplaySession::new(self.dev, connector, engine, mode, self.options.format);
            match session.start() {
                Ok(()) => {
                    // Single writer: the session is presenting and nothing
                    // else touches the mapping.
                    if let Some(buffer) = session.buffer_mut() {
                        paint::fill_solid(buffer, self.options.fill_color);
                    }
                    sessions.push(session);
                }
                Err(e) => {
                    error!("{}: {}", name, e);
                    report.skipped.push(SkippedConnector {
                        connector: name,
                        reason: SkipReason::SessionFailed(e),
                    });
                }
            }
        }

        report.started = sessions.len();

        if !sessions.is_empty() {
            info!(
                "{} session(s) presenting; interrupt to restore and exit",
                sessions.len()
            );
            while !self.token.is_cancelled() {
                thread::sleep(self.options.poll_interval);
            }
            info!("interrupted, restoring displays");
        }

        for mut session in sessions.into_iter().rev() {
            if let Err(partial) = session.shutdown() {
                warn!("{}: {}", session.connector_name(), partial);
                report.teardown_failures.extend(partial.failures);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{test_mode, MockDevice, Op};
    use nix::errno::Errno;

    fn options() -> SurfaceOptions {
        SurfaceOptions {
            format: PixelFormat::Bgr888,
            fill_color: [0, 0, 0xff],
            poll_interval: Duration::from_millis(1),
        }
    }

    fn cancelled() -> CancelToken {
        let token = CancelToken::new();
        token.cancel();
        token
    }

    fn run(dev: &MockDevice) -> ExitReport {
        let catalog = ResourceCatalog::enumerate(dev).unwrap();
        SessionSupervisor::new(dev, &catalog, cancelled(), options()).run()
    }

    #[test_log::test]
    fn one_connected_one_disconnected_starts_exactly_one_session() {
        let dev = MockDevice::new()
            .with_crtc(30)
            .with_crtc(31)
            .with_encoder(20, 0b11)
            .with_encoder(21, 0b11)
            .with_connector(1, true, vec![test_mode()], vec![20])
            .with_connector(2, false, vec![], vec![21]);

        let report = run(&dev);
        assert_eq!(report.started, 1);
        assert_eq!(report.skip_count(), 1);
        assert!(matches!(report.skipped[0].reason, SkipReason::Disconnected));
        assert!(report.teardown_failures.is_empty());
        assert_eq!(dev.live_dumb_count(), 0);
        assert!(!dev.master_held());
    }

    #[test_log::test]
    fn engines_are_never_shared_across_sessions() {
        let dev = MockDevice::new()
            .with_crtc(30)
            .with_crtc(31)
            .with_encoder(20, 0b11)
            .with_encoder(21, 0b11)
            .with_connector(1, true, vec![test_mode()], vec![20])
            .with_connector(2, true, vec![test_mode()], vec![21]);

        let report = run(&dev);
        assert_eq!(report.started, 2);

        let mut bound: Vec<u32> = dev
            .journal()
            .iter()
            .filter_map(|op| match op {
                Op::SetCrtc {
                    crtc_id,
                    mode_valid: true,
                    ..
                } => Some(*crtc_id),
                _ => None,
            })
            .collect();
        bound.sort_unstable();
        bound.dedup();
        assert_eq!(bound.len(), 2);
    }

    #[test_log::test]
    fn teardown_runs_in_reverse_start_order() {
        let prior = test_mode();
        let dev = MockDevice::new()
            .with_bound_crtc(30, 70, prior.clone())
            .with_bound_crtc(31, 71, prior)
            .with_encoder(20, 0b01)
            .with_encoder(21, 0b10)
            .with_connector(1, true, vec![test_mode()], vec![20])
            .with_connector(2, true, vec![test_mode()], vec![21]);

        let report = run(&dev);
        assert_eq!(report.started, 2);

        // Restore commits rebind the saved buffers: 31 (last started) first.
        let restores: Vec<(u32, u32)> = dev
            .journal()
            .iter()
            .filter_map(|op| match op {
                Op::SetCrtc { crtc_id, fb_id, .. } if *fb_id == 70 || *fb_id == 71 => {
                    Some((*crtc_id, *fb_id))
                }
                _ => None,
            })
            .collect();
        assert_eq!(restores, vec![(31, 71), (30, 70)]);
    }

    #[test_log::test]
    fn engine_exhaustion_skips_but_does_not_abort() {
        let dev = MockDevice::new()
            .with_crtc(30)
            .with_encoder(20, 0b1)
            .with_encoder(21, 0b1)
            .with_connector(1, true, vec![test_mode()], vec![20])
            .with_connector(2, true, vec![test_mode()], vec![21])
            .with_connector(3, false, vec![], vec![]);

        let report = run(&dev);
        assert_eq!(report.started, 1);
        assert_eq!(report.skip_count(), 2);
        assert!(report
            .skipped
            .iter()
            .any(|s| matches!(s.reason, SkipReason::NoCompatibleEngine)));
    }

    #[test_log::test]
    fn rejected_commit_is_recorded_and_others_proceed() {
        let dev = MockDevice::new()
            .with_crtc(30)
            .with_encoder(20, 0b1)
            .with_connector(1, true, vec![test_mode()], vec![20])
            .reject_set_crtc(Errno::EINVAL);

        let report = run(&dev);
        assert_eq!(report.started, 0);
        assert_eq!(report.skip_count(), 1);
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::SessionFailed(SessionError::ModeSetRejected(_))
        ));
        assert_eq!(dev.live_dumb_count(), 0);
        assert!(!dev.master_held());
    }
}
