// src/mode.rs

//! Display timings.

use bitflags::bitflags;

bitflags! {
    /// Kernel mode flags. Only the bits this tool interprets are named;
    /// unknown bits are preserved via `from_bits_retain`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u32 {
        const PHSYNC = 1 << 0;
        const NHSYNC = 1 << 1;
        const PVSYNC = 1 << 2;
        const NVSYNC = 1 << 3;
        const INTERLACE = 1 << 4;
        const DBLSCAN = 1 << 5;
        const CSYNC = 1 << 6;
        const PCSYNC = 1 << 7;
        const NCSYNC = 1 << 8;
        const HSKEW = 1 << 9;
        const DBLCLK = 1 << 12;
        const CLKDIV2 = 1 << 13;
    }
}

/// A selected display timing: resolution, clocking and scan parameters.
///
/// Carries every field the kernel's mode record has so a captured mode can
/// be committed back bit-exactly during restoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingMode {
    pub name: String,
    /// Pixel clock in kHz.
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    /// Refresh rate as reported by the kernel, in Hz.
    pub vrefresh: u32,
    pub flags: ModeFlags,
    /// Kernel mode type bits (preferred, driver, userdef, ...).
    pub kind: u32,
}

impl TimingMode {
    pub fn width(&self) -> u32 {
        self.hdisplay as u32
    }

    pub fn height(&self) -> u32 {
        self.vdisplay as u32
    }

    /// Refresh rate in millihertz, derived from the pixel clock and the
    /// total scan dimensions: interlaced modes scan twice per frame,
    /// doublescan modes half, and a vertical scan factor divides further.
    /// The order of those adjustments matters and is fixed.
    pub fn refresh_millihertz(&self) -> u32 {
        if self.htotal == 0 || self.vtotal == 0 {
            return 0;
        }

        let mut rate = (self.clock as u64 * 1_000_000 / self.htotal as u64
            + self.vtotal as u64 / 2)
            / self.vtotal as u64;

        if self.flags.contains(ModeFlags::INTERLACE) {
            rate *= 2;
        }
        if self.flags.contains(ModeFlags::DBLSCAN) {
            rate /= 2;
        }
        if self.vscan > 1 {
            rate /= self.vscan as u64;
        }

        rate as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(clock: u32, htotal: u16, vtotal: u16, flags: ModeFlags, vscan: u16) -> TimingMode {
        TimingMode {
            name: "test".to_string(),
            clock,
            hdisplay: 1920,
            hsync_start: 2008,
            hsync_end: 2052,
            htotal,
            hskew: 0,
            vdisplay: 1080,
            vsync_start: 1084,
            vsync_end: 1089,
            vtotal,
            vscan,
            vrefresh: 60,
            flags,
            kind: 0,
        }
    }

    #[test_log::test]
    fn refresh_rounds_from_clock_and_totals() {
        // 148.5 MHz over a 2080x1125 raster.
        let m = mode(148_500, 2080, 1125, ModeFlags::empty(), 1);
        assert_eq!(m.refresh_millihertz(), 63_461);
    }

    #[test_log::test]
    fn refresh_matches_standard_1080p60() {
        // CEA-861 1920x1080@60: 148.5 MHz, 2200x1125 total.
        let m = mode(148_500, 2200, 1125, ModeFlags::empty(), 1);
        assert_eq!(m.refresh_millihertz(), 60_000);
    }

    #[test_log::test]
    fn interlace_doubles_then_doublescan_halves_then_vscan_divides() {
        let base = mode(148_500, 2200, 1125, ModeFlags::empty(), 1);
        let rate = base.refresh_millihertz();

        let interlaced = mode(148_500, 2200, 1125, ModeFlags::INTERLACE, 1);
        assert_eq!(interlaced.refresh_millihertz(), rate * 2);

        let doublescan = mode(148_500, 2200, 1125, ModeFlags::DBLSCAN, 1);
        assert_eq!(doublescan.refresh_millihertz(), rate / 2);

        let vscan = mode(148_500, 2200, 1125, ModeFlags::empty(), 3);
        assert_eq!(vscan.refresh_millihertz(), rate / 3);

        let all = mode(148_500, 2200, 1125, ModeFlags::INTERLACE | ModeFlags::DBLSCAN, 2);
        assert_eq!(all.refresh_millihertz(), rate * 2 / 2 / 2);
    }

    #[test_log::test]
    fn degenerate_totals_do_not_divide_by_zero() {
        assert_eq!(mode(148_500, 0, 1125, ModeFlags::empty(), 1).refresh_millihertz(), 0);
        assert_eq!(mode(148_500, 2200, 0, ModeFlags::empty(), 1).refresh_millihertz(), 0);
    }
}
