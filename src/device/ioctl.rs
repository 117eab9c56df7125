// src/device/ioctl.rs

//! Raw DRM uapi structures and ioctl bindings.
//!
//! Layouts mirror `drm.h`/`drm_mode.h`. Only the requests this tool issues
//! are bound; everything is kept `pub(crate)` behind `drm::DrmDevice`.

#![allow(non_camel_case_types, dead_code)]

use libc::{c_char, c_uint};

/// DRM ioctl identifier ('d').
const DRM_IOCTL_BASE: u8 = b'd';

pub const DRM_MODE_CONNECTED: u32 = 1;
pub const DRM_CLIENT_CAP_UNIVERSAL_PLANES: u64 = 2;

/// Length of the mode name field, terminating NUL included.
pub const DRM_DISPLAY_MODE_LEN: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_card_res {
    pub fb_id_ptr: u64,
    pub crtc_id_ptr: u64,
    pub connector_id_ptr: u64,
    pub encoder_id_ptr: u64,
    pub count_fbs: u32,
    pub count_crtcs: u32,
    pub count_connectors: u32,
    pub count_encoders: u32,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_modeinfo {
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
    pub vrefresh: u32,
    pub flags: u32,
    pub type_: u32,
    pub name: [c_char; DRM_DISPLAY_MODE_LEN],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_get_connector {
    pub encoders_ptr: u64,
    pub modes_ptr: u64,
    pub props_ptr: u64,
    pub prop_values_ptr: u64,
    pub count_modes: u32,
    pub count_props: u32,
    pub count_encoders: u32,
    pub encoder_id: u32,
    pub connector_id: u32,
    pub connector_type: u32,
    pub connector_type_id: u32,
    pub connection: u32,
    pub mm_width: u32,
    pub mm_height: u32,
    pub subpixel: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_get_encoder {
    pub encoder_id: u32,
    pub encoder_type: u32,
    pub crtc_id: u32,
    pub possible_crtcs: u32,
    pub possible_clones: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_crtc {
    pub set_connectors_ptr: u64,
    pub count_connectors: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub x: u32,
    pub y: u32,
    pub gamma_size: u32,
    pub mode_valid: u32,
    pub mode: drm_mode_modeinfo,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_create_dumb {
    pub height: u32,
    pub width: u32,
    pub bpp: u32,
    pub flags: u32,
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_map_dumb {
    pub handle: u32,
    pub pad: u32,
    /// Fake offset to pass to mmap on the card fd.
    pub offset: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_destroy_dumb {
    pub handle: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_fb_cmd2 {
    pub fb_id: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub flags: u32,
    pub handles: [u32; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
    pub modifier: [u64; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_get_plane_res {
    pub plane_id_ptr: u64,
    pub count_planes: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_get_plane {
    pub plane_id: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub possible_crtcs: u32,
    pub gamma_size: u32,
    pub count_format_types: u32,
    pub format_type_ptr: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_set_client_cap {
    pub capability: u64,
    pub value: u64,
}

nix::ioctl_none!(set_master, DRM_IOCTL_BASE, 0x1e);
nix::ioctl_none!(drop_master, DRM_IOCTL_BASE, 0x1f);
nix::ioctl_write_ptr!(set_client_cap, DRM_IOCTL_BASE, 0x0d, drm_set_client_cap);
nix::ioctl_readwrite!(mode_get_resources, DRM_IOCTL_BASE, 0xa0, drm_mode_card_res);
nix::ioctl_readwrite!(mode_get_crtc, DRM_IOCTL_BASE, 0xa1, drm_mode_crtc);
nix::ioctl_readwrite!(mode_set_crtc, DRM_IOCTL_BASE, 0xa2, drm_mode_crtc);
nix::ioctl_readwrite!(mode_get_encoder, DRM_IOCTL_BASE, 0xa6, drm_mode_get_encoder);
nix::ioctl_readwrite!(mode_get_connector, DRM_IOCTL_BASE, 0xa7, drm_mode_get_connector);
nix::ioctl_readwrite!(mode_rm_fb, DRM_IOCTL_BASE, 0xaf, c_uint);
nix::ioctl_readwrite!(mode_create_dumb, DRM_IOCTL_BASE, 0xb2, drm_mode_create_dumb);
nix::ioctl_readwrite!(mode_map_dumb, DRM_IOCTL_BASE, 0xb3, drm_mode_map_dumb);
nix::ioctl_readwrite!(mode_destroy_dumb, DRM_IOCTL_BASE, 0xb4, drm_mode_destroy_dumb);
nix::ioctl_readwrite!(mode_get_plane_res, DRM_IOCTL_BASE, 0xb5, drm_mode_get_plane_res);
nix::ioctl_readwrite!(mode_get_plane, DRM_IOCTL_BASE, 0xb6, drm_mode_get_plane);
nix::ioctl_readwrite!(mode_add_fb2, DRM_IOCTL_BASE, 0xb8, drm_mode_fb_cmd2);
