#![forbid(unsafe_code)]

//! Subtitle/OSD compositor core.
//!
//! Takes pre-rasterized overlay bitmaps (libass-style coverage bitmaps
//! and premultiplied BGRA images) and blends them into a destination
//! video frame, which may be planar YUV with chroma subsampling,
//! limited or full range, with or without alpha. A [`Compositor`]
//! caches every per-format pipeline and per-input scaled bitmap, so
//! frames with unchanged inputs skip conversion entirely.

mod compose;
mod csp;
mod draw;
mod error;
mod image;
mod imgfmt;
mod osd;
mod repack;
mod scale;
mod slices;

pub use compose::{composite_once, ComposeOptions, ComposeStats, Compositor};
pub use csp::{AlphaMode, ChromaLoc, Colorimetry, Levels, Matrix, Primaries, Transfer};
pub use error::{OsdError, OsdResult};
pub use image::{Image, ImageParams, ImageView, ImageViewMut, PlaneMut, PlaneRef};
pub use imgfmt::{
    comp, find_planar_format, ComponentType, FormatClass, FormatDesc, PixelFormat, PlanarDesc,
    PlaneDesc, MAX_PLANES,
};
pub use osd::{
    supported_overlay_format, AssPart, BgraPart, OverlayFormat, OverlayItem, OverlayList,
    OverlayParts, MAX_OSD_PARTS,
};
pub use repack::{Repack, RepackDir};
pub use scale::Scaler;
