//! Overlay input model.
//!
//! The compositor consumes a per-frame list of overlay items. Each item
//! groups the parts produced by one source (a subtitle renderer, a UI
//! layer, ...) under a stable `render_index`, and carries a monotonic
//! `change_id` so unchanged inputs can reuse cached conversions. The
//! whole list is borrowed for the duration of one `composite` call and
//! never retained.

/// Upper bound on distinct `render_index` values.
pub const MAX_OSD_PARTS: usize = 64;

/// Tag of an overlay item's bitmap format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayFormat {
    /// Placeholder published by sources that currently render nothing.
    Empty,
    /// Monochrome 8-bit coverage bitmaps tinted by a single color
    /// (libass-style).
    Ass,
    /// Premultiplied BGRA bitmaps.
    Bgra,
}

/// Which overlay formats `composite` accepts.
pub fn supported_overlay_format(fmt: OverlayFormat) -> bool {
    match fmt {
        OverlayFormat::Ass | OverlayFormat::Bgra => true,
        OverlayFormat::Empty => false,
    }
}

/// One glyph-style part: an 8-bit coverage bitmap placed at `(x, y)`,
/// tinted by `color` (`0xRRGGBBAA`, low byte is *inverse* alpha).
#[derive(Clone, Copy, Debug)]
pub struct AssPart<'a> {
    pub x: i32,
    pub y: i32,
    pub w: usize,
    pub h: usize,
    pub bitmap: &'a [u8],
    pub stride: usize,
    pub color: u32,
}

/// One image-style part: a premultiplied BGRA bitmap of source size
/// `(w, h)`, placed at `(x, y)` and drawn at display size `(dw, dh)`.
/// Position and size may extend past the frame; the compositor clips.
#[derive(Clone, Copy, Debug)]
pub struct BgraPart<'a> {
    pub x: i32,
    pub y: i32,
    pub w: usize,
    pub h: usize,
    pub dw: usize,
    pub dh: usize,
    pub bitmap: &'a [u8],
    pub stride: usize,
}

#[derive(Clone, Copy, Debug)]
pub enum OverlayParts<'a> {
    Empty,
    Ass(&'a [AssPart<'a>]),
    Bgra(&'a [BgraPart<'a>]),
}

impl OverlayParts<'_> {
    pub fn format(&self) -> OverlayFormat {
        match self {
            OverlayParts::Empty => OverlayFormat::Empty,
            OverlayParts::Ass(_) => OverlayFormat::Ass,
            OverlayParts::Bgra(_) => OverlayFormat::Bgra,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OverlayItem<'a> {
    /// Stable source slot, `< MAX_OSD_PARTS`. Keys the part cache.
    pub render_index: usize,
    /// Bumped by the producer whenever this item's parts change.
    pub change_id: u64,
    pub parts: OverlayParts<'a>,
}

#[derive(Clone, Copy, Debug)]
pub struct OverlayList<'a> {
    /// Bumped whenever any item (or the set of items) changes.
    pub change_id: u64,
    /// Bounding size of all parts; the destination must be at least
    /// this large.
    pub w: usize,
    pub h: usize,
    pub items: &'a [OverlayItem<'a>],
}

impl<'a> OverlayList<'a> {
    pub fn empty(change_id: u64, w: usize, h: usize) -> OverlayList<'a> {
        OverlayList {
            change_id,
            w,
            h,
            items: &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_table_accepts_only_real_bitmaps() {
        assert!(supported_overlay_format(OverlayFormat::Ass));
        assert!(supported_overlay_format(OverlayFormat::Bgra));
        assert!(!supported_overlay_format(OverlayFormat::Empty));
    }

    #[test]
    fn parts_report_their_format() {
        assert_eq!(OverlayParts::Empty.format(), OverlayFormat::Empty);
        assert_eq!(OverlayParts::Ass(&[]).format(), OverlayFormat::Ass);
        assert_eq!(OverlayParts::Bgra(&[]).format(), OverlayFormat::Bgra);
    }
}
