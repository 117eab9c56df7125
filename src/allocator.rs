// src/allocator.rs

//! Timing-engine allocation.
//!
//! First-fit: walk the connector's encoders in order and take the lowest
//! free engine index the encoder can reach. A connector may fail allocation
//! even though a global assignment exists, because an earlier connector can
//! greedily take the one engine a later connector needed. That limitation is
//! inherited deliberately and reported, not worked around.

use std::fmt;

use log::trace;

use crate::catalog::{Connector, ResourceCatalog, TimingEngine};

/// No encoder of the connector can reach a free engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoCompatibleEngine {
    pub connector: String,
}

impl fmt::Display for NoCompatibleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no compatible timing engine free for {}", self.connector)
    }
}

impl std::error::Error for NoCompatibleEngine {}

/// Holds the process-wide set of reserved engines. Reservations are made at
/// session start and are not returned; exclusivity lasts for the process.
#[derive(Debug, Default)]
pub struct TimingEngineAllocator {
    reserved: u32,
}

impl TimingEngineAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves and returns the first free engine reachable from the
    /// connector's encoders. Deterministic for a fixed catalog and call
    /// order.
    pub fn allocate(
        &mut self,
        connector: &Connector,
        catalog: &ResourceCatalog,
    ) -> Result<TimingEngine, NoCompatibleEngine> {
        for &encoder_id in &connector.encoders {
            let Some(encoder) = catalog.encoder(encoder_id) else {
                continue;
            };
            for engine in &catalog.engines {
                let bit = 1u32 << engine.index;
                if encoder.possible_engines & bit == 0 {
                    continue;
                }
                if self.reserved & bit != 0 {
                    continue;
                }
                self.reserved |= bit;
                trace!(
                    "reserved engine {} (index {}) for {} via encoder {}",
                    engine.id,
                    engine.index,
                    connector.display_name(),
                    encoder_id
                );
                return Ok(*engine);
            }
        }
        Err(NoCompatibleEngine {
            connector: connector.display_name(),
        })
    }

    /// Bitmask of reserved engine indices.
    pub fn reserved_set(&self) -> u32 {
        self.reserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{test_mode, MockDevice};

    fn catalog(dev: &MockDevice) -> ResourceCatalog {
        ResourceCatalog::enumerate(dev).unwrap()
    }

    #[test_log::test]
    fn picks_lowest_free_index() {
        let dev = MockDevice::new()
            .with_crtc(30)
            .with_crtc(31)
            .with_encoder(20, 0b11)
            .with_connector(1, true, vec![test_mode()], vec![20]);
        let catalog = catalog(&dev);
        let mut alloc = TimingEngineAllocator::new();

        let engine = alloc.allocate(&catalog.connectors[0], &catalog).unwrap();
        assert_eq!(engine.id, 30);
        assert_eq!(alloc.reserved_set(), 0b01);
    }

    #[test_log::test]
    fn never_hands_out_the_same_engine_twice() {
        let dev = MockDevice::new()
            .with_crtc(30)
            .with_crtc(31)
            .with_encoder(20, 0b11)
            .with_encoder(21, 0b11)
            .with_connector(1, true, vec![test_mode()], vec![20])
            .with_connector(2, true, vec![test_mode()], vec![21]);
        let catalog = catalog(&dev);
        let mut alloc = TimingEngineAllocator::new();

        let first = alloc.allocate(&catalog.connectors[0], &catalog).unwrap();
        let second = alloc.allocate(&catalog.connectors[1], &catalog).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(alloc.reserved_set(), 0b11);
    }

    #[test_log::test]
    fn exhaustion_and_missing_encoder_fail() {
        let dev = MockDevice::new()
            .with_crtc(30)
            .with_encoder(20, 0b1)
            .with_connector(1, true, vec![test_mode()], vec![20])
            .with_connector(2, true, vec![test_mode()], vec![20])
            .with_connector(3, true, vec![test_mode()], vec![]);
        let catalog = catalog(&dev);
        let mut alloc = TimingEngineAllocator::new();

        alloc.allocate(&catalog.connectors[0], &catalog).unwrap();
        assert!(alloc.allocate(&catalog.connectors[1], &catalog).is_err());
        assert!(alloc.allocate(&catalog.connectors[2], &catalog).is_err());
    }

    #[test_log::test]
    fn first_fit_can_starve_a_later_connector() {
        // Connector 1 could use either engine but greedily takes index 0,
        // the only engine connector 2's encoder can reach.
        let dev = MockDevice::new()
            .with_crtc(30)
            .with_crtc(31)
            .with_encoder(20, 0b11)
            .with_encoder(21, 0b01)
            .with_connector(1, true, vec![test_mode()], vec![20])
            .with_connector(2, true, vec![test_mode()], vec![21]);
        let catalog = catalog(&dev);
        let mut alloc = TimingEngineAllocator::new();

        let first = alloc.allocate(&catalog.connectors[0], &catalog).unwrap();
        assert_eq!(first.index, 0);
        assert!(alloc.allocate(&catalog.connectors[1], &catalog).is_err());
    }
}
