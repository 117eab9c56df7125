// src/catalog.rs

//! One-shot snapshot of the display hardware.
//!
//! The catalog is queried once at startup and never refreshed: connection
//! status is allowed to go stale if a display is plugged or unplugged while
//! the process runs.

use std::fmt;

use log::warn;

use crate::device::{DeviceError, KmsDevice};
use crate::mode::TimingMode;

/// Human classification of a connector, matching the kernel type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    Unknown,
    Vga,
    DviI,
    DviD,
    DviA,
    Composite,
    SVideo,
    Lvds,
    Component,
    NinePinDin,
    DisplayPort,
    HdmiA,
    HdmiB,
    Tv,
    Edp,
    Virtual,
    Dsi,
    Dpi,
}

impl ConnectorKind {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Vga,
            2 => Self::DviI,
            3 => Self::DviD,
            4 => Self::DviA,
            5 => Self::Composite,
            6 => Self::SVideo,
            7 => Self::Lvds,
            8 => Self::Component,
            9 => Self::NinePinDin,
            10 => Self::DisplayPort,
            11 => Self::HdmiA,
            12 => Self::HdmiB,
            13 => Self::Tv,
            14 => Self::Edp,
            15 => Self::Virtual,
            16 => Self::Dsi,
            17 => Self::Dpi,
            _ => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Vga => "VGA",
            Self::DviI => "DVI-I",
            Self::DviD => "DVI-D",
            Self::DviA => "DVI-A",
            Self::Composite => "Composite",
            Self::SVideo => "SVIDEO",
            Self::Lvds => "LVDS",
            Self::Component => "Component",
            Self::NinePinDin => "DIN",
            Self::DisplayPort => "DP",
            Self::HdmiA => "HDMI-A",
            Self::HdmiB => "HDMI-B",
            Self::Tv => "TV",
            Self::Edp => "eDP",
            Self::Virtual => "Virtual",
            Self::Dsi => "DSI",
            Self::Dpi => "DPI",
        }
    }
}

/// A physical display output and its capabilities at snapshot time.
#[derive(Debug, Clone)]
pub struct Connector {
    pub id: u32,
    pub kind: ConnectorKind,
    pub kind_index: u32,
    pub connected: bool,
    /// Encoder currently driving this connector, 0 if none.
    pub current_encoder: u32,
    /// Supported modes, highest priority first.
    pub modes: Vec<TimingMode>,
    /// Identifiers of encoders able to drive this connector.
    pub encoders: Vec<u32>,
}

impl Connector {
    /// Display name in the conventional `<type>-<index>` form, e.g. `HDMI-A-1`.
    pub fn display_name(&self) -> String {
        format!("{}-{}", self.kind.name(), self.kind_index)
    }
}

/// A hardware scan-out engine (CRTC). `index` is its position in the
/// kernel's CRTC list, which is what encoder compatibility masks and the
/// allocator's reservation bits refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingEngine {
    pub id: u32,
    pub index: usize,
}

/// Static encoder capability: which engines it can be fed by.
#[derive(Debug, Clone, Copy)]
pub struct EncoderCompat {
    pub id: u32,
    /// Bitmask over engine indices.
    pub possible_engines: u32,
}

#[derive(Debug)]
pub enum CatalogError {
    /// The underlying subsystem could not be queried.
    ResourceUnavailable(DeviceError),
    /// The query succeeded but reported no connectors or engines.
    NoResources,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceUnavailable(e) => write!(f, "display resources unavailable: {}", e),
            Self::NoResources => write!(f, "device reported no display resources"),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ResourceUnavailable(e) => Some(e),
            Self::NoResources => None,
        }
    }
}

/// Immutable snapshot of connectors, engines and encoder compatibility.
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    pub connectors: Vec<Connector>,
    pub engines: Vec<TimingEngine>,
    encoders: Vec<EncoderCompat>,
}

impl ResourceCatalog {
    /// Queries the device once. Connectors or encoders that fail their
    /// per-id lookup are dropped from the snapshot with a warning; a failed
    /// or empty top-level query is fatal.
    pub fn enumerate<D: KmsDevice>(dev: &D) -> Result<Self, CatalogError> {
        let ids = dev.resources().map_err(CatalogError::ResourceUnavailable)?;
        if ids.connectors.is_empty() || ids.crtcs.is_empty() {
            return Err(CatalogError::NoResources);
        }

        let engines = ids
            .crtcs
            .iter()
            .enumerate()
            .map(|(index, &id)| TimingEngine { id, index })
            .collect();

        let mut connectors = Vec::with_capacity(ids.connectors.len());
        for &id in &ids.connectors {
            match dev.connector(id) {
                Ok(state) => connectors.push(Connector {
                    id: state.id,
                    kind: ConnectorKind::from_code(state.kind_code),
                    kind_index: state.kind_index,
                    connected: state.connected,
                    current_encoder: state.current_encoder,
                    modes: state.modes,
                    encoders: state.encoders,
                }),
                Err(e) => warn!("skipping connector {}: {}", id, e),
            }
        }

        let mut encoders = Vec::with_capacity(ids.encoders.len());
        for &id in &ids.encoders {
            match dev.encoder(id) {
                Ok(state) => encoders.push(EncoderCompat {
                    id: state.id,
                    possible_engines: state.possible_crtcs,
                }),
                Err(e) => warn!("skipping encoder {}: {}", id, e),
            }
        }

        Ok(Self {
            connectors,
            engines,
            encoders,
        })
    }

    pub fn encoder(&self, id: u32) -> Option<&EncoderCompat> {
        self.encoders.iter().find(|e| e.id == id)
    }

    pub fn connected_count(&self) -> usize {
        self.connectors.iter().filter(|c| c.connected).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{test_mode, MockDevice};

    #[test_log::test]
    fn snapshot_captures_connectors_engines_and_compat() {
        let dev = MockDevice::new()
            .with_crtc(30)
            .with_crtc(31)
            .with_encoder(20, 0b01)
            .with_encoder(21, 0b10)
            .with_connector(1, true, vec![test_mode()], vec![20])
            .with_connector(2, false, vec![], vec![21]);

        let catalog = ResourceCatalog::enumerate(&dev).unwrap();
        assert_eq!(catalog.connectors.len(), 2);
        assert_eq!(catalog.engines.len(), 2);
        assert_eq!(catalog.engines[1], TimingEngine { id: 31, index: 1 });
        assert_eq!(catalog.connected_count(), 1);
        assert_eq!(catalog.encoder(21).unwrap().possible_engines, 0b10);
        assert_eq!(catalog.connectors[0].display_name(), "HDMI-A-1");
    }

    #[test_log::test]
    fn empty_device_is_no_resources() {
        let dev = MockDevice::new();
        assert!(matches!(
            ResourceCatalog::enumerate(&dev),
            Err(CatalogError::NoResources)
        ));
    }

    #[test_log::test]
    fn connector_kind_names_follow_kernel_codes() {
        assert_eq!(ConnectorKind::from_code(11).name(), "HDMI-A");
        assert_eq!(ConnectorKind::from_code(14).name(), "eDP");
        assert_eq!(ConnectorKind::from_code(99).name(), "Unknown");
    }
}
