// src/lib.rs

//! `scanout` puts a solid-color framebuffer on every connected display and
//! restores the previous configuration on exit.
//!
//! The flow is: snapshot the hardware once ([`catalog`]), reserve a timing
//! engine per connected display ([`allocator`]), build and map a dumb pixel
//! buffer ([`framebuffer`]), commit a mode-set and hold until interrupted
//! ([`session`], driven by [`supervisor`]), then tear everything down in
//! reverse. All kernel interaction goes through the [`device`] seam.

pub mod allocator;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod device;
pub mod framebuffer;
pub mod mode;
pub mod paint;
pub mod report;
pub mod session;
pub mod supervisor;
