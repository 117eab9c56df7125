// src/session.rs

//! One connector driven end-to-end.
//!
//! ```text
//! Idle -> ControlAcquired -> BufferReady -> ModeBound -> Presenting
//!                                                            |
//!                                      Restoring <-----------+
//!                                          |
//!                                        Closed
//! ```
//!
//! Any step's failure runs best-effort reverse cleanup of what the session
//! had acquired and lands in `Failed`. `Restoring` is also entered on
//! external interruption, and re-entering it is a no-op: a second signal
//! during teardown must not double-free anything.
//!
//! Teardown mirrors acquisition in reverse: the engine is restored to its
//! saved binding (or unbound) while the pixel buffer still exists, then the
//! buffer is released, then the control token. Every sub-step runs even if
//! an earlier one fails; failures are collected, not propagated mid-way.

use std::fmt;

use log::{debug, error, info, warn};

use crate::catalog::{Connector, TimingEngine};
use crate::device::{CrtcState, DeviceError, KmsDevice};
use crate::framebuffer::{FramebufferManager, PixelBuffer, PixelFormat};
use crate::mode::TimingMode;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ControlAcquired,
    BufferReady,
    ModeBound,
    Presenting,
    Restoring,
    Closed,
    Failed,
}

/// Why a session could not start.
#[derive(Debug)]
pub enum SessionError {
    /// Exclusive display-control is held by another process.
    ControlDenied(DeviceError),
    /// The pixel buffer could not be fully constructed.
    AllocationFailed(DeviceError),
    /// The mode-set commit was rejected; `EINVAL` means an invalid
    /// engine/mode/object combination.
    ModeSetRejected(DeviceError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlDenied(e) => write!(f, "exclusive display-control denied: {}", e),
            Self::AllocationFailed(e) => write!(f, "pixel buffer allocation failed: {}", e),
            Self::ModeSetRejected(e) => write!(f, "mode-set commit rejected: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ControlDenied(e) | Self::AllocationFailed(e) | Self::ModeSetRejected(e) => {
                Some(e)
            }
        }
    }
}

/// One or more restoration sub-steps failed. The remaining steps still ran.
#[derive(Debug)]
pub struct TeardownPartialFailure {
    pub failures: Vec<DeviceError>,
}

impl fmt::Display for TeardownPartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} teardown step(s) failed", self.failures.len())?;
        for e in &self.failures {
            write!(f, "; {}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownPartialFailure {}

/// Engine configuration captured immediately before this session's own
/// commit, used only for restoration.
#[derive(Debug, Clone)]
pub struct SavedState {
    pub engine_id: u32,
    pub buffer_id: u32,
    pub x: u32,
    pub y: u32,
    /// `None` when the engine had no valid mode; restore then unbinds.
    pub mode: Option<TimingMode>,
}

impl SavedState {
    fn capture(crtc: CrtcState) -> Self {
        Self {
            engine_id: crtc.id,
            buffer_id: crtc.buffer_id,
            x: crtc.x,
            y: crtc.y,
            mode: crtc.mode,
        }
    }
}

/// Drives one connector: exclusive control, buffer, commit, hold, restore.
pub struct DisplaySession<'a, D: KmsDevice> {
    dev: &'a D,
    connector_id: u32,
    connector_name: String,
    engine: TimingEngine,
    mode: TimingMode,
    format: PixelFormat,
    state: SessionState,
    buffer: Option<PixelBuffer>,
    saved: Option<SavedState>,
    master_held: bool,
}

impl<'a, D: KmsDevice> DisplaySession<'a, D> {
    pub fn new(
        dev: &'a D,
        connector: &Connector,
        engine: TimingEngine,
        mode: TimingMode,
        format: PixelFormat,
    ) -> Self {
        Self {
            dev,
            connector_id: connector.id,
            connector_name: connector.display_name(),
            engine,
            mode,
            format,
            state: SessionState::Idle,
            buffer: None,
            saved: None,
            master_held: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connector_name(&self) -> &str {
        &self.connector_name
    }

    /// The mapped buffer, available from `BufferReady` until `Restoring`.
    pub fn buffer_mut(&mut self) -> Option<&mut PixelBuffer> {
        self.buffer.as_mut()
    }

    /// Runs the session up to `Presenting`. On any failure the resources
    /// acquired so far are released in reverse order and the session is
    /// `Failed`; nothing leaks to the caller.
    pub fn start(&mut self) -> Result<(), SessionError> {
        assert_eq!(self.state, SessionState::Idle, "session started twice");

        self.dev.acquire_master().map_err(|e| {
            self.state = SessionState::Failed;
            SessionError::ControlDenied(e)
        })?;
        self.master_held = true;
        self.state = SessionState::ControlAcquired;

        let manager = FramebufferManager::new(self.dev, self.format);
        let buffer = match manager.create(self.mode.width(), self.mode.height()) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.release_master_best_effort(&mut Vec::new());
                self.state = SessionState::Failed;
                return Err(SessionError::AllocationFailed(e));
            }
        };
        self.state = SessionState::BufferReady;

        // Snapshot the engine before our commit mutates it. A failed capture
        // only costs the restore; the session still runs.
        self.saved = match self.dev.crtc(self.engine.id) {
            Ok(crtc) => Some(SavedState::capture(crtc)),
            Err(e) => {
                warn!("{}: could not save engine state: {}", self.connector_name, e);
                None
            }
        };

        let commit = self.dev.set_crtc(
            self.engine.id,
            buffer.fb_id(),
            0,
            0,
            &[self.connector_id],
            Some(&self.mode),
        );
        if let Err(e) = commit {
            if e.is_invalid_argument() {
                error!(
                    "{}: engine {} rejected mode {} as invalid",
                    self.connector_name, self.engine.id, self.mode.name
                );
            }
            // Never bound: no restore commit, just release buffer and control.
            let mut failures = Vec::new();
            manager.destroy(buffer, &mut failures);
            self.release_master_best_effort(&mut failures);
            self.saved = None;
            self.state = SessionState::Failed;
            return Err(SessionError::ModeSetRejected(e));
        }
        self.buffer = Some(buffer);
        self.state = SessionState::ModeBound;

        info!(
            "{}: presenting {}x{}@{}mHz on engine {}",
            self.connector_name,
            self.mode.width(),
            self.mode.height(),
            self.mode.refresh_millihertz(),
            self.engine.id
        );
        self.state = SessionState::Presenting;
        Ok(())
    }

    /// Restores the pre-session configuration and releases every resource.
    ///
    /// Idempotent: once teardown has begun (or the session never acquired
    /// anything) further calls do nothing. Each sub-step runs even if an
    /// earlier one failed.
    pub fn shutdown(&mut self) -> Result<(), TeardownPartialFailure> {
        match self.state {
            SessionState::Idle
            | SessionState::Restoring
            | SessionState::Closed
            | SessionState::Failed => return Ok(()),
            _ => {}
        }
        let was_bound = matches!(
            self.state,
            SessionState::ModeBound | SessionState::Presenting
        );
        self.state = SessionState::Restoring;
        debug!("{}: restoring", self.connector_name);

        let mut failures = Vec::new();

        // Point the engine away from our buffer before the buffer dies.
        if was_bound {
            let restore = match self.saved.take() {
                Some(saved) if saved.mode.is_some() => self.dev.set_crtc(
                    saved.engine_id,
                    saved.buffer_id,
                    saved.x,
                    saved.y,
                    &[self.connector_id],
                    saved.mode.as_ref(),
                ),
                // No prior binding (or the capture failed): leave it unbound.
                _ => self
                    .dev
                    .set_crtc(self.engine.id, 0, 0, 0, &[], None),
            };
            if let Err(e) = restore {
                warn!("{}: restore commit failed: {}", self.connector_name, e);
                failures.push(e);
            }
        }

        if let Some(buffer) = self.buffer.take() {
            FramebufferManager::new(self.dev, self.format).destroy(buffer, &mut failures);
        }

        self.release_master_best_effort(&mut failures);

        self.state = SessionState::Closed;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownPartialFailure { failures })
        }
    }

    fn release_master_best_effort(&mut self, failures: &mut Vec<DeviceError>) {
        if self.master_held {
            self.master_held = false;
            if let Err(e) = self.dev.release_master() {
                warn!("{}: {}", self.connector_name, e);
                failures.push(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceCatalog;
    use crate::device::mock::{test_mode, MockDevice, Op};
    use nix::errno::Errno;

    fn fixture() -> MockDevice {
        MockDevice::new()
            .with_crtc(30)
            .with_encoder(20, 0b1)
            .with_connector(1, true, vec![test_mode()], vec![20])
    }

    fn session<'a>(dev: &'a MockDevice, catalog: &ResourceCatalog) -> DisplaySession<'a, MockDevice> {
        DisplaySession::new(
            dev,
            &catalog.connectors[0],
            catalog.engines[0],
            test_mode(),
            PixelFormat::Bgr888,
        )
    }

    #[test_log::test]
    fn releases_mirror_acquisitions_in_reverse() {
        let dev = fixture();
        let catalog = ResourceCatalog::enumerate(&dev).unwrap();
        let mut s = session(&dev, &catalog);

        s.start().unwrap();
        assert_eq!(s.state(), SessionState::Presenting);
        s.shutdown().unwrap();
        assert_eq!(s.state(), SessionState::Closed);

        let journal = dev.journal();
        assert!(matches!(
            journal.as_slice(),
            [
                Op::AcquireMaster,
                Op::CreateDumb { .. },
                Op::AddFramebuffer { .. },
                Op::MapDumb { .. },
                Op::SetCrtc { .. },
                Op::SetCrtc { .. },
                Op::Unmap,
                Op::RemoveFramebuffer { .. },
                Op::DestroyDumb { .. },
                Op::ReleaseMaster,
            ]
        ));
        assert_eq!(dev.live_dumb_count(), 0);
        assert_eq!(dev.live_framebuffer_count(), 0);
        assert_eq!(dev.live_mapping_count(), 0);
        assert!(!dev.master_held());
    }

    #[test_log::test]
    fn second_shutdown_adds_no_operations() {
        let dev = fixture();
        let catalog = ResourceCatalog::enumerate(&dev).unwrap();
        let mut s = session(&dev, &catalog);

        s.start().unwrap();
        s.shutdown().unwrap();
        let ops_after_first = dev.journal_len();

        s.shutdown().unwrap();
        assert_eq!(dev.journal_len(), ops_after_first);
    }

    #[test_log::test]
    fn saved_state_round_trips() {
        let prior = test_mode();
        let dev = MockDevice::new()
            .with_bound_crtc(30, 77, prior.clone())
            .with_encoder(20, 0b1)
            .with_connector(1, true, vec![test_mode()], vec![20]);
        let catalog = ResourceCatalog::enumerate(&dev).unwrap();
        let mut s = session(&dev, &catalog);

        s.start().unwrap();
        let during = dev.crtc_state(30).unwrap();
        assert_ne!(during.buffer_id, 77);

        s.shutdown().unwrap();
        let after = dev.crtc_state(30).unwrap();
        assert_eq!(after.buffer_id, 77);
        assert_eq!(after.mode.as_ref(), Some(&prior));
    }

    #[test_log::test]
    fn unbound_engine_is_left_unbound_after_restore() {
        let dev = fixture();
        let catalog = ResourceCatalog::enumerate(&dev).unwrap();
        let mut s = session(&dev, &catalog);

        s.start().unwrap();
        s.shutdown().unwrap();

        let after = dev.crtc_state(30).unwrap();
        assert_eq!(after.buffer_id, 0);
        assert!(after.mode.is_none());
    }

    #[test_log::test]
    fn rejected_commit_fails_and_releases_without_restore() {
        let dev = fixture().reject_set_crtc(Errno::EINVAL);
        let catalog = ResourceCatalog::enumerate(&dev).unwrap();
        let mut s = session(&dev, &catalog);

        let err = s.start().unwrap_err();
        assert!(matches!(err, SessionError::ModeSetRejected(e) if e.is_invalid_argument()));
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(dev.live_dumb_count(), 0);
        assert_eq!(dev.live_framebuffer_count(), 0);
        assert!(!dev.master_held());
        // No restore was attempted: nothing was ever bound.
        let set_crtcs = dev
            .journal()
            .iter()
            .filter(|op| matches!(op, Op::SetCrtc { .. }))
            .count();
        assert_eq!(set_crtcs, 0);

        // Shutdown after failure is a no-op.
        let ops = dev.journal_len();
        s.shutdown().unwrap();
        assert_eq!(dev.journal_len(), ops);
    }

    #[test_log::test]
    fn denied_control_leaves_device_untouched() {
        let dev = fixture().deny_master();
        let catalog = ResourceCatalog::enumerate(&dev).unwrap();
        let mut s = session(&dev, &catalog);

        assert!(matches!(s.start(), Err(SessionError::ControlDenied(_))));
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(dev.journal_len(), 0);
    }

    #[test_log::test]
    fn allocation_failure_releases_the_control_token() {
        let dev = fixture().fail_create_dumb();
        let catalog = ResourceCatalog::enumerate(&dev).unwrap();
        let mut s = session(&dev, &catalog);

        assert!(matches!(s.start(), Err(SessionError::AllocationFailed(_))));
        assert!(!dev.master_held());
        assert_eq!(dev.journal(), vec![Op::AcquireMaster, Op::ReleaseMaster]);
    }
}
