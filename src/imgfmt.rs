//! Pixel-format ids and the descriptor oracle.
//!
//! Every supported format is "regular": byte-aligned native-endian
//! components, at most [`MAX_PLANES`] planes, each plane holding one
//! component (planar formats) or a fixed byte order (packed BGRA).
//! [`find_planar_format`] is the reverse direction: given a descriptor
//! assembled by the pipeline builder, locate the id that matches it.

use crate::csp::Levels;

pub const MAX_PLANES: usize = 4;

/// Component codes, shared between packed byte orders and planar layouts.
pub mod comp {
    /// Padding byte, undefined contents.
    pub const PAD: u8 = 0;
    /// Red, luma, or gray.
    pub const R_Y: u8 = 1;
    /// Green or Cb.
    pub const G_CB: u8 = 2;
    /// Blue or Cr.
    pub const B_CR: u8 = 3;
    pub const A: u8 = 4;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed B,G,R,A bytes (low to high address).
    Bgra8,
    /// Packed B,G,R,pad bytes.
    Bgrx8,
    Gray8,
    /// Planar gray + alpha.
    GrayA8,
    Yuv444p8,
    Yuva444p8,
    Yuv422p8,
    Yuva422p8,
    Yuv420p8,
    Yuva420p8,
    /// 10 bits stored in the low bits of a 16-bit little-endian word.
    Yuv420p10,
    Grayf32,
    GrayAf32,
    /// Planar float RGB in G,B,R plane order.
    Gbrpf32,
    Gbrapf32,
    Yuv444pf32,
    Yuva444pf32,
    Yuv422pf32,
    Yuva422pf32,
    Yuv420pf32,
    Yuva420pf32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentType {
    Uint,
    Float,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatClass {
    Rgb,
    Yuv,
    Gray,
}

/// One plane's component layout. For planar formats `num_components`
/// is 1; for packed BGRA the entries give the component per byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneDesc {
    pub num_components: u8,
    pub components: [u8; MAX_PLANES],
}

impl PlaneDesc {
    pub const EMPTY: PlaneDesc = PlaneDesc {
        num_components: 0,
        components: [comp::PAD; MAX_PLANES],
    };
}

#[derive(Clone, Debug)]
pub struct FormatDesc {
    pub id: PixelFormat,
    pub name: &'static str,
    pub component_type: ComponentType,
    /// Bytes per component.
    pub component_size: usize,
    /// Negative: MSB padding; `depth = component_size*8 - pad.abs()`.
    pub component_pad: i8,
    pub num_planes: usize,
    pub planes: [PlaneDesc; MAX_PLANES],
    pub chroma_xs: u8,
    pub chroma_ys: u8,
    pub has_alpha: bool,
    pub class: FormatClass,
}

/// The structural part of a descriptor, used for reverse lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanarDesc {
    pub component_type: ComponentType,
    pub component_size: usize,
    pub component_pad: i8,
    pub num_planes: usize,
    pub planes: [PlaneDesc; MAX_PLANES],
    pub chroma_xs: u8,
    pub chroma_ys: u8,
}

impl FormatDesc {
    pub fn plane_is_chroma(&self, p: usize) -> bool {
        self.class == FormatClass::Yuv
            && self.planes[p].num_components == 1
            && matches!(self.planes[p].components[0], comp::G_CB | comp::B_CR)
    }

    /// Horizontal subsampling shift of plane `p`.
    pub fn xs(&self, p: usize) -> u8 {
        if self.plane_is_chroma(p) { self.chroma_xs } else { 0 }
    }

    /// Vertical subsampling shift of plane `p`.
    pub fn ys(&self, p: usize) -> u8 {
        if self.plane_is_chroma(p) { self.chroma_ys } else { 0 }
    }

    pub fn bytes_per_pixel(&self, p: usize) -> usize {
        self.planes[p].num_components as usize * self.component_size
    }

    /// Bits of actual sample depth.
    pub fn depth(&self) -> u32 {
        self.component_size as u32 * 8 - self.component_pad.unsigned_abs() as u32
    }

    /// Largest storable sample value for uint formats.
    pub fn max_value(&self) -> u32 {
        (1u32 << self.depth()) - 1
    }

    /// Pixel alignment needed so luma and chroma sample grids coincide.
    pub fn align_x(&self) -> usize {
        1 << self.chroma_xs
    }

    pub fn align_y(&self) -> usize {
        1 << self.chroma_ys
    }
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 21] = [
        PixelFormat::Bgra8,
        PixelFormat::Bgrx8,
        PixelFormat::Gray8,
        PixelFormat::GrayA8,
        PixelFormat::Yuv444p8,
        PixelFormat::Yuva444p8,
        PixelFormat::Yuv422p8,
        PixelFormat::Yuva422p8,
        PixelFormat::Yuv420p8,
        PixelFormat::Yuva420p8,
        PixelFormat::Yuv420p10,
        PixelFormat::Grayf32,
        PixelFormat::GrayAf32,
        PixelFormat::Gbrpf32,
        PixelFormat::Gbrapf32,
        PixelFormat::Yuv444pf32,
        PixelFormat::Yuva444pf32,
        PixelFormat::Yuv422pf32,
        PixelFormat::Yuva422pf32,
        PixelFormat::Yuv420pf32,
        PixelFormat::Yuva420pf32,
    ];

    pub fn desc(self) -> &'static FormatDesc {
        &DESCS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.desc().name
    }

    /// The planar-float format with the same plane structure, used as
    /// the working representation by the repack layer. Float formats
    /// are their own companion.
    pub fn float_companion(self) -> PixelFormat {
        use PixelFormat::*;
        match self {
            Bgra8 => Gbrapf32,
            Bgrx8 => Gbrpf32,
            Gray8 => Grayf32,
            GrayA8 => GrayAf32,
            Yuv444p8 => Yuv444pf32,
            Yuva444p8 => Yuva444pf32,
            Yuv422p8 => Yuv422pf32,
            Yuva422p8 => Yuva422pf32,
            Yuv420p8 | Yuv420p10 => Yuv420pf32,
            Yuva420p8 => Yuva420pf32,
            f => f,
        }
    }

    pub fn planar_desc(self) -> PlanarDesc {
        let d = self.desc();
        PlanarDesc {
            component_type: d.component_type,
            component_size: d.component_size,
            component_pad: d.component_pad,
            num_planes: d.num_planes,
            planes: d.planes,
            chroma_xs: d.chroma_xs,
            chroma_ys: d.chroma_ys,
        }
    }
}

pub fn find_planar_format(want: &PlanarDesc) -> Option<PixelFormat> {
    PixelFormat::ALL
        .into_iter()
        .find(|f| f.planar_desc() == *want)
}

/// Stored-integer to float mapping for one component: `f = v*scale + offset`.
///
/// Luma/RGB honor the nominal range; chroma is centered at zero so that
/// premultiplication and linear blending behave; alpha is always full
/// range. RGB formats are full range by definition.
pub(crate) fn norm_params(desc: &FormatDesc, component: u8, levels: Levels) -> (f32, f32) {
    debug_assert_eq!(desc.component_type, ComponentType::Uint);
    let d = desc.depth();
    let full_max = ((1u32 << d) - 1) as f32;
    let hi = 1u32 << (d - 8); // 8-bit range constants scaled to depth

    let is_chroma = desc.class == FormatClass::Yuv
        && matches!(component, comp::G_CB | comp::B_CR);
    let levels = if desc.class == FormatClass::Rgb {
        Levels::Full
    } else {
        levels
    };

    if component == comp::A {
        (1.0 / full_max, 0.0)
    } else if is_chroma {
        let mid = (128 * hi) as f32;
        let scale = match levels {
            Levels::Limited => 1.0 / (224 * hi) as f32,
            Levels::Full => 1.0 / full_max,
        };
        (scale, -mid * scale)
    } else {
        match levels {
            Levels::Limited => {
                let scale = 1.0 / (219 * hi) as f32;
                (scale, -((16 * hi) as f32) * scale)
            }
            Levels::Full => (1.0 / full_max, 0.0),
        }
    }
}

const fn p1(c: u8) -> PlaneDesc {
    PlaneDesc {
        num_components: 1,
        components: [c, 0, 0, 0],
    }
}

const fn p4(a: u8, b: u8, c: u8, d: u8) -> PlaneDesc {
    PlaneDesc {
        num_components: 4,
        components: [a, b, c, d],
    }
}

#[allow(clippy::too_many_arguments)]
const fn fd(
    id: PixelFormat,
    name: &'static str,
    component_type: ComponentType,
    component_size: usize,
    component_pad: i8,
    planes: &[PlaneDesc],
    chroma: (u8, u8),
    has_alpha: bool,
    class: FormatClass,
) -> FormatDesc {
    let mut all = [PlaneDesc::EMPTY; MAX_PLANES];
    let mut i = 0;
    while i < planes.len() {
        all[i] = planes[i];
        i += 1;
    }
    FormatDesc {
        id,
        name,
        component_type,
        component_size,
        component_pad,
        num_planes: planes.len(),
        planes: all,
        chroma_xs: chroma.0,
        chroma_ys: chroma.1,
        has_alpha,
        class,
    }
}

use comp::{A, B_CR, G_CB, PAD, R_Y};
use ComponentType::{Float, Uint};
use FormatClass::{Gray, Rgb, Yuv};

static DESCS: [FormatDesc; 21] = [
    fd(PixelFormat::Bgra8, "bgra", Uint, 1, 0, &[p4(B_CR, G_CB, R_Y, A)], (0, 0), true, Rgb),
    fd(PixelFormat::Bgrx8, "bgrx", Uint, 1, 0, &[p4(B_CR, G_CB, R_Y, PAD)], (0, 0), false, Rgb),
    fd(PixelFormat::Gray8, "gray", Uint, 1, 0, &[p1(R_Y)], (0, 0), false, Gray),
    fd(PixelFormat::GrayA8, "graya", Uint, 1, 0, &[p1(R_Y), p1(A)], (0, 0), true, Gray),
    fd(PixelFormat::Yuv444p8, "yuv444p", Uint, 1, 0, &[p1(R_Y), p1(G_CB), p1(B_CR)], (0, 0), false, Yuv),
    fd(PixelFormat::Yuva444p8, "yuva444p", Uint, 1, 0, &[p1(R_Y), p1(G_CB), p1(B_CR), p1(A)], (0, 0), true, Yuv),
    fd(PixelFormat::Yuv422p8, "yuv422p", Uint, 1, 0, &[p1(R_Y), p1(G_CB), p1(B_CR)], (1, 0), false, Yuv),
    fd(PixelFormat::Yuva422p8, "yuva422p", Uint, 1, 0, &[p1(R_Y), p1(G_CB), p1(B_CR), p1(A)], (1, 0), true, Yuv),
    fd(PixelFormat::Yuv420p8, "yuv420p", Uint, 1, 0, &[p1(R_Y), p1(G_CB), p1(B_CR)], (1, 1), false, Yuv),
    fd(PixelFormat::Yuva420p8, "yuva420p", Uint, 1, 0, &[p1(R_Y), p1(G_CB), p1(B_CR), p1(A)], (1, 1), true, Yuv),
    fd(PixelFormat::Yuv420p10, "yuv420p10", Uint, 2, -6, &[p1(R_Y), p1(G_CB), p1(B_CR)], (1, 1), false, Yuv),
    fd(PixelFormat::Grayf32, "grayf", Float, 4, 0, &[p1(R_Y)], (0, 0), false, Gray),
    fd(PixelFormat::GrayAf32, "grayaf", Float, 4, 0, &[p1(R_Y), p1(A)], (0, 0), true, Gray),
    fd(PixelFormat::Gbrpf32, "gbrpf", Float, 4, 0, &[p1(G_CB), p1(B_CR), p1(R_Y)], (0, 0), false, Rgb),
    fd(PixelFormat::Gbrapf32, "gbrapf", Float, 4, 0, &[p1(G_CB), p1(B_CR), p1(R_Y), p1(A)], (0, 0), true, Rgb),
    fd(PixelFormat::Yuv444pf32, "yuv444pf", Float, 4, 0, &[p1(R_Y), p1(G_CB), p1(B_CR)], (0, 0), false, Yuv),
    fd(PixelFormat::Yuva444pf32, "yuva444pf", Float, 4, 0, &[p1(R_Y), p1(G_CB), p1(B_CR), p1(A)], (0, 0), true, Yuv),
    fd(PixelFormat::Yuv422pf32, "yuv422pf", Float, 4, 0, &[p1(R_Y), p1(G_CB), p1(B_CR)], (1, 0), false, Yuv),
    fd(PixelFormat::Yuva422pf32, "yuva422pf", Float, 4, 0, &[p1(R_Y), p1(G_CB), p1(B_CR), p1(A)], (1, 0), true, Yuv),
    fd(PixelFormat::Yuv420pf32, "yuv420pf", Float, 4, 0, &[p1(R_Y), p1(G_CB), p1(B_CR)], (1, 1), false, Yuv),
    fd(PixelFormat::Yuva420pf32, "yuva420pf", Float, 4, 0, &[p1(R_Y), p1(G_CB), p1(B_CR), p1(A)], (1, 1), true, Yuv),
];
