//! Emulated GeForce3-family display adapter.
//!
//! This crate re-exports the workspace members: [`edid`] generates the monitor's EDID image and
//! [`device`] models the PCI function (DDC bus, VBE DISPI controller, NV register dispatch).

#![forbid(unsafe_code)]

pub use gf3_device as device;
pub use gf3_edid as edid;

pub use gf3_device::{
    Aperture, DisplayAdapter, DisplaySink, GeForce3, Gf3Config, Gf3Model, Gf3Snapshot, PortIO,
};
pub use gf3_edid::{EdidImage, EdidInfo};
