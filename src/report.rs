// src/report.rs

//! Human-readable hardware inventory.
//!
//! Read-only reporting over the catalog and device: connectors, engines with
//! their current binding and timings, encoders, and the plane table with
//! supported fourcc formats. Consumes core outputs, changes nothing.

use log::{info, warn};

use crate::catalog::ResourceCatalog;
use crate::device::KmsDevice;

fn fourcc_name(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

/// Logs the full inventory at info level.
pub fn log_inventory<D: KmsDevice>(dev: &D, catalog: &ResourceCatalog) {
    info!("connectors ({}):", catalog.connectors.len());
    for conn in &catalog.connectors {
        info!(
            "  {} (id {}): {}, encoder {}, {} mode(s)",
            conn.display_name(),
            conn.id,
            if conn.connected { "connected" } else { "disconnected" },
            conn.current_encoder,
            conn.modes.len()
        );
        if let Some(mode) = conn.modes.first() {
            info!(
                "    preferred mode {}: {}x{}@{}mHz",
                mode.name,
                mode.width(),
                mode.height(),
                mode.refresh_millihertz()
            );
        }
    }

    info!("timing engines ({}):", catalog.engines.len());
    for engine in &catalog.engines {
        match dev.crtc(engine.id) {
            Ok(crtc) => {
                info!(
                    "  engine {} (index {}): buffer {}, at {},{}, gamma size {}",
                    engine.id, engine.index, crtc.buffer_id, crtc.x, crtc.y, crtc.gamma_size
                );
                if let Some(mode) = &crtc.mode {
                    info!(
                        "    mode {}: clock {} h {}/{}/{}/{}/{} v {}/{}/{}/{}/{}",
                        mode.name,
                        mode.clock,
                        mode.hdisplay,
                        mode.hsync_start,
                        mode.hsync_end,
                        mode.htotal,
                        mode.hskew,
                        mode.vdisplay,
                        mode.vsync_start,
                        mode.vsync_end,
                        mode.vtotal,
                        mode.vscan
                    );
                }
            }
            Err(e) => warn!("  engine {}: {}", engine.id, e),
        }
    }

    match dev.resources() {
        Ok(ids) => {
            info!("framebuffers: {:?}", ids.framebuffers);
            info!("encoders: {:?}", ids.encoders);
        }
        Err(e) => warn!("resource id query failed: {}", e),
    }

    match dev.plane_resources() {
        Ok(plane_ids) => {
            info!("planes ({}):", plane_ids.len());
            for id in plane_ids {
                match dev.plane(id) {
                    Ok(plane) => {
                        info!(
                            "  plane {}: crtc {}, fb {}, possible crtcs {:#010x}, formats [{}]",
                            plane.id,
                            plane.crtc_id,
                            plane.fb_id,
                            plane.possible_crtcs,
                            plane
                                .formats
                                .iter()
                                .map(|&f| fourcc_name(f))
                                .collect::<Vec<_>>()
                                .join(" ")
                        );
                    }
                    Err(e) => warn!("  plane {}: {}", id, e),
                }
            }
        }
        Err(e) => warn!("plane query failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{test_mode, MockDevice};

    #[test_log::test]
    fn fourcc_names_decode_little_endian() {
        assert_eq!(fourcc_name(0x3432_4742), "BG24");
        assert_eq!(fourcc_name(0x3432_5258), "XR24");
        assert_eq!(fourcc_name(0), "????");
    }

    #[test_log::test]
    fn inventory_logging_is_read_only() {
        let dev = MockDevice::new()
            .with_bound_crtc(30, 7, test_mode())
            .with_encoder(20, 0b1)
            .with_connector(1, true, vec![test_mode()], vec![20]);
        let catalog = ResourceCatalog::enumerate(&dev).unwrap();

        log_inventory(&dev, &catalog);
        assert_eq!(dev.journal_len(), 0);
    }
}
