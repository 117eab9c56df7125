// src/device/drm.rs

//! [`KmsDevice`] over a real DRM card node.
//!
//! Count/fill queries follow the kernel contract: issue the ioctl once with
//! zeroed pointers to learn the counts, allocate, then issue it again with
//! the arrays filled in. Counts can shrink between the two calls (hot-plug),
//! so results are truncated to whichever pass reported less.

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use super::ioctl;
use super::{
    ConnectorState, CrtcState, DeviceError, DeviceResult, DumbBuffer, EncoderState, KmsDevice,
    MappedPixels, PlaneState, ResourceIds,
};
use crate::framebuffer::PixelFormat;
use crate::mode::{ModeFlags, TimingMode};

/// An open DRM card node.
pub struct DrmDevice {
    file: File,
}

impl DrmDevice {
    /// Opens the card node read-write and non-blocking, then best-effort
    /// enables the universal-planes client capability so the plane table in
    /// the inventory report includes primary and cursor planes.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        debug!("opened {} (fd {})", path.display(), file.as_raw_fd());

        let dev = Self { file };
        let cap = ioctl::drm_set_client_cap {
            capability: ioctl::DRM_CLIENT_CAP_UNIVERSAL_PLANES,
            value: 1,
        };
        if let Err(errno) = unsafe { ioctl::set_client_cap(dev.fd(), &cap) } {
            warn!("DRM_IOCTL_SET_CLIENT_CAP(UNIVERSAL_PLANES) failed: {}", errno);
        }
        Ok(dev)
    }

    fn fd(&self) -> libc::c_int {
        self.file.as_raw_fd()
    }
}

fn mode_from_raw(raw: &ioctl::drm_mode_modeinfo) -> TimingMode {
    let name_bytes: Vec<u8> = raw
        .name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    TimingMode {
        name: String::from_utf8_lossy(&name_bytes).into_owned(),
        clock: raw.clock,
        hdisplay: raw.hdisplay,
        hsync_start: raw.hsync_start,
        hsync_end: raw.hsync_end,
        htotal: raw.htotal,
        hskew: raw.hskew,
        vdisplay: raw.vdisplay,
        vsync_start: raw.vsync_start,
        vsync_end: raw.vsync_end,
        vtotal: raw.vtotal,
        vscan: raw.vscan,
        vrefresh: raw.vrefresh,
        flags: ModeFlags::from_bits_retain(raw.flags),
        kind: raw.type_,
    }
}

fn mode_to_raw(mode: &TimingMode) -> ioctl::drm_mode_modeinfo {
    let mut raw: ioctl::drm_mode_modeinfo = unsafe { std::mem::zeroed() };
    raw.clock = mode.clock;
    raw.hdisplay = mode.hdisplay;
    raw.hsync_start = mode.hsync_start;
    raw.hsync_end = mode.hsync_end;
    raw.htotal = mode.htotal;
    raw.hskew = mode.hskew;
    raw.vdisplay = mode.vdisplay;
    raw.vsync_start = mode.vsync_start;
    raw.vsync_end = mode.vsync_end;
    raw.vtotal = mode.vtotal;
    raw.vscan = mode.vscan;
    raw.vrefresh = mode.vrefresh;
    raw.flags = mode.flags.bits();
    raw.type_ = mode.kind;
    // Leave room for the terminating NUL.
    for (dst, src) in raw
        .name
        .iter_mut()
        .zip(mode.name.bytes().take(ioctl::DRM_DISPLAY_MODE_LEN - 1))
    {
        *dst = src as libc::c_char;
    }
    raw
}

fn err(op: &'static str) -> impl Fn(Errno) -> DeviceError {
    move |errno| DeviceError::new(op, errno)
}

impl KmsDevice for DrmDevice {
    fn resources(&self) -> DeviceResult<ResourceIds> {
        let fd = self.fd();
        let mut res: ioctl::drm_mode_card_res = unsafe { std::mem::zeroed() };
        unsafe { ioctl::mode_get_resources(fd, &mut res) }
            .map_err(err("DRM_IOCTL_MODE_GETRESOURCES"))?;

        let mut fbs = vec![0u32; res.count_fbs as usize];
        let mut crtcs = vec![0u32; res.count_crtcs as usize];
        let mut connectors = vec![0u32; res.count_connectors as usize];
        let mut encoders = vec![0u32; res.count_encoders as usize];

        let mut fill: ioctl::drm_mode_card_res = unsafe { std::mem::zeroed() };
        fill.fb_id_ptr = fbs.as_mut_ptr() as u64;
        fill.crtc_id_ptr = crtcs.as_mut_ptr() as u64;
        fill.connector_id_ptr = connectors.as_mut_ptr() as u64;
        fill.encoder_id_ptr = encoders.as_mut_ptr() as u64;
        fill.count_fbs = res.count_fbs;
        fill.count_crtcs = res.count_crtcs;
        fill.count_connectors = res.count_connectors;
        fill.count_encoders = res.count_encoders;
        unsafe { ioctl::mode_get_resources(fd, &mut fill) }
            .map_err(err("DRM_IOCTL_MODE_GETRESOURCES"))?;

        fbs.truncate(fill.count_fbs.min(res.count_fbs) as usize);
        crtcs.truncate(fill.count_crtcs.min(res.count_crtcs) as usize);
        connectors.truncate(fill.count_connectors.min(res.count_connectors) as usize);
        encoders.truncate(fill.count_encoders.min(res.count_encoders) as usize);

        Ok(ResourceIds {
            framebuffers: fbs,
            crtcs,
            connectors,
            encoders,
        })
    }

    fn connector(&self, id: u32) -> DeviceResult<ConnectorState> {
        let fd = self.fd();
        let mut count: ioctl::drm_mode_get_connector = unsafe { std::mem::zeroed() };
        count.connector_id = id;
        unsafe { ioctl::mode_get_connector(fd, &mut count) }
            .map_err(err("DRM_IOCTL_MODE_GETCONNECTOR"))?;

        let mut modes: Vec<ioctl::drm_mode_modeinfo> =
            vec![unsafe { std::mem::zeroed() }; count.count_modes as usize];
        let mut encoders = vec![0u32; count.count_encoders as usize];

        let mut fill: ioctl::drm_mode_get_connector = unsafe { std::mem::zeroed() };
        fill.connector_id = id;
        fill.modes_ptr = modes.as_mut_ptr() as u64;
        fill.count_modes = count.count_modes;
        fill.encoders_ptr = encoders.as_mut_ptr() as u64;
        fill.count_encoders = count.count_encoders;
        unsafe { ioctl::mode_get_connector(fd, &mut fill) }
            .map_err(err("DRM_IOCTL_MODE_GETCONNECTOR"))?;

        modes.truncate(fill.count_modes.min(count.count_modes) as usize);
        encoders.truncate(fill.count_encoders.min(count.count_encoders) as usize);

        Ok(ConnectorState {
            id,
            kind_code: fill.connector_type,
            kind_index: fill.connector_type_id,
            connected: fill.connection == ioctl::DRM_MODE_CONNECTED,
            current_encoder: fill.encoder_id,
            modes: modes.iter().map(mode_from_raw).collect(),
            encoders,
        })
    }

    fn encoder(&self, id: u32) -> DeviceResult<EncoderState> {
        let mut enc: ioctl::drm_mode_get_encoder = unsafe { std::mem::zeroed() };
        enc.encoder_id = id;
        unsafe { ioctl::mode_get_encoder(self.fd(), &mut enc) }
            .map_err(err("DRM_IOCTL_MODE_GETENCODER"))?;
        Ok(EncoderState {
            id: enc.encoder_id,
            kind_code: enc.encoder_type,
            crtc_id: enc.crtc_id,
            possible_crtcs: enc.possible_crtcs,
        })
    }

    fn crtc(&self, id: u32) -> DeviceResult<CrtcState> {
        let mut crtc: ioctl::drm_mode_crtc = unsafe { std::mem::zeroed() };
        crtc.crtc_id = id;
        unsafe { ioctl::mode_get_crtc(self.fd(), &mut crtc) }
            .map_err(err("DRM_IOCTL_MODE_GETCRTC"))?;
        Ok(CrtcState {
            id: crtc.crtc_id,
            buffer_id: crtc.fb_id,
            x: crtc.x,
            y: crtc.y,
            gamma_size: crtc.gamma_size,
            mode: (crtc.mode_valid != 0).then(|| mode_from_raw(&crtc.mode)),
        })
    }

    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        x: u32,
        y: u32,
        connectors: &[u32],
        mode: Option<&TimingMode>,
    ) -> DeviceResult<()> {
        let mut req: ioctl::drm_mode_crtc = unsafe { std::mem::zeroed() };
        req.crtc_id = crtc_id;
        req.fb_id = fb_id;
        req.x = x;
        req.y = y;
        req.set_connectors_ptr = connectors.as_ptr() as u64;
        req.count_connectors = connectors.len() as u32;
        if let Some(mode) = mode {
            req.mode_valid = 1;
            req.mode = mode_to_raw(mode);
        }
        unsafe { ioctl::mode_set_crtc(self.fd(), &mut req) }
            .map_err(err("DRM_IOCTL_MODE_SETCRTC"))?;
        Ok(())
    }

    fn acquire_master(&self) -> DeviceResult<()> {
        unsafe { ioctl::set_master(self.fd()) }.map_err(err("DRM_IOCTL_SET_MASTER"))?;
        Ok(())
    }

    fn release_master(&self) -> DeviceResult<()> {
        unsafe { ioctl::drop_master(self.fd()) }.map_err(err("DRM_IOCTL_DROP_MASTER"))?;
        Ok(())
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> DeviceResult<DumbBuffer> {
        let mut req: ioctl::drm_mode_create_dumb = unsafe { std::mem::zeroed() };
        req.width = width;
        req.height = height;
        req.bpp = bpp;
        unsafe { ioctl::mode_create_dumb(self.fd(), &mut req) }
            .map_err(err("DRM_IOCTL_MODE_CREATE_DUMB"))?;
        debug!(
            "created dumb buffer: handle {} pitch {} size {}",
            req.handle, req.pitch, req.size
        );
        Ok(DumbBuffer {
            handle: req.handle,
            pitch: req.pitch,
            size: req.size,
        })
    }

    fn destroy_dumb(&self, handle: u32) -> DeviceResult<()> {
        let mut req = ioctl::drm_mode_destroy_dumb { handle };
        unsafe { ioctl::mode_destroy_dumb(self.fd(), &mut req) }
            .map_err(err("DRM_IOCTL_MODE_DESTROY_DUMB"))?;
        Ok(())
    }

    fn add_framebuffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        handle: u32,
        pitch: u32,
    ) -> DeviceResult<u32> {
        let mut req: ioctl::drm_mode_fb_cmd2 = unsafe { std::mem::zeroed() };
        req.width = width;
        req.height = height;
        req.pixel_format = format.fourcc();
        req.handles[0] = handle;
        req.pitches[0] = pitch;
        unsafe { ioctl::mode_add_fb2(self.fd(), &mut req) }
            .map_err(err("DRM_IOCTL_MODE_ADDFB2"))?;
        Ok(req.fb_id)
    }

    fn remove_framebuffer(&self, fb_id: u32) -> DeviceResult<()> {
        let mut id: libc::c_uint = fb_id;
        unsafe { ioctl::mode_rm_fb(self.fd(), &mut id) }.map_err(err("DRM_IOCTL_MODE_RMFB"))?;
        Ok(())
    }

    fn map_dumb(&self, handle: u32, size: u64) -> DeviceResult<MappedPixels> {
        let mut req: ioctl::drm_mode_map_dumb = unsafe { std::mem::zeroed() };
        req.handle = handle;
        unsafe { ioctl::mode_map_dumb(self.fd(), &mut req) }
            .map_err(err("DRM_IOCTL_MODE_MAP_DUMB"))?;

        let len = NonZeroUsize::new(size as usize)
            .ok_or_else(|| DeviceError::new("mmap", Errno::EINVAL))?;
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &self.file,
                req.offset as libc::off_t,
            )
        }
        .map_err(err("mmap"))?;

        Ok(unsafe { MappedPixels::from_raw(ptr.cast::<u8>(), size as usize) })
    }

    fn unmap(&self, map: MappedPixels) -> DeviceResult<()> {
        let (ptr, len) = map.into_raw();
        unsafe { munmap(ptr.cast(), len) }.map_err(err("munmap"))?;
        Ok(())
    }

    fn plane_resources(&self) -> DeviceResult<Vec<u32>> {
        let fd = self.fd();
        let mut count: ioctl::drm_mode_get_plane_res = unsafe { std::mem::zeroed() };
        unsafe { ioctl::mode_get_plane_res(fd, &mut count) }
            .map_err(err("DRM_IOCTL_MODE_GETPLANERESOURCES"))?;

        let mut planes = vec![0u32; count.count_planes as usize];
        let mut fill: ioctl::drm_mode_get_plane_res = unsafe { std::mem::zeroed() };
        fill.plane_id_ptr = planes.as_mut_ptr() as u64;
        fill.count_planes = count.count_planes;
        unsafe { ioctl::mode_get_plane_res(fd, &mut fill) }
            .map_err(err("DRM_IOCTL_MODE_GETPLANERESOURCES"))?;

        planes.truncate(fill.count_planes.min(count.count_planes) as usize);
        Ok(planes)
    }

    fn plane(&self, id: u32) -> DeviceResult<PlaneState> {
        let fd = self.fd();
        let mut count: ioctl::drm_mode_get_plane = unsafe { std::mem::zeroed() };
        count.plane_id = id;
        unsafe { ioctl::mode_get_plane(fd, &mut count) }
            .map_err(err("DRM_IOCTL_MODE_GETPLANE"))?;

        let mut formats = vec![0u32; count.count_format_types as usize];
        let mut fill: ioctl::drm_mode_get_plane = unsafe { std::mem::zeroed() };
        fill.plane_id = id;
        fill.format_type_ptr = formats.as_mut_ptr() as u64;
        fill.count_format_types = count.count_format_types;
        unsafe { ioctl::mode_get_plane(fd, &mut fill) }
            .map_err(err("DRM_IOCTL_MODE_GETPLANE"))?;

        formats.truncate(fill.count_format_types.min(count.count_format_types) as usize);
        Ok(PlaneState {
            id: fill.plane_id,
            crtc_id: fill.crtc_id,
            fb_id: fill.fb_id,
            possible_crtcs: fill.possible_crtcs,
            gamma_size: fill.gamma_size,
            formats,
        })
    }
}
