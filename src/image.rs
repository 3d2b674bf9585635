//! Owned planar images and borrowed region views.
//!
//! An [`Image`] owns its plane buffers; cropping and plane extraction
//! hand out [`ImageView`]/[`ImageViewMut`] descriptors instead of
//! retained pointers, so the alpha plane of an image can be read as a
//! standalone gray image without aliasing.
//!
//! Plane buffers are allocated 4-byte aligned with 16-byte-aligned
//! strides, which lets 16-bit and float rows be reinterpreted with
//! `bytemuck` and gives row-band converters a little slack past the
//! logical width.

use smallvec::SmallVec;

use crate::csp::{AlphaMode, ChromaLoc, Colorimetry, Levels};
use crate::imgfmt::{comp, ComponentType, FormatClass, FormatDesc, PixelFormat};

pub(crate) fn align_up(v: usize, a: usize) -> usize {
    v.div_ceil(a) * a
}

pub(crate) fn div_shift_up(v: usize, s: u8) -> usize {
    (v + (1usize << s) - 1) >> s
}

/// Everything that identifies a destination configuration. Two frames
/// with equal parameters can share one compositor pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageParams {
    pub fmt: PixelFormat,
    pub w: usize,
    pub h: usize,
    pub color: Colorimetry,
    pub chroma_loc: ChromaLoc,
    pub alpha: AlphaMode,
}

impl ImageParams {
    /// Parameters with class-appropriate defaults: sRGB for RGB formats,
    /// BT.709 limited for YUV and gray, chroma sited left.
    pub fn new(fmt: PixelFormat, w: usize, h: usize) -> Self {
        let color = match fmt.desc().class {
            FormatClass::Rgb => Colorimetry::srgb(),
            _ => Colorimetry::bt709_limited(),
        };
        let alpha = if fmt.desc().has_alpha {
            AlphaMode::Straight
        } else {
            AlphaMode::None
        };
        Self {
            fmt,
            w,
            h,
            color,
            chroma_loc: ChromaLoc::Left,
            alpha,
        }
    }
}

struct Plane {
    // Stored as f32 (rather than u8) so that reinterpreting rows as
    // u16/f32 is always aligned. bytemuck::cast_vec/cast_slice_box require
    // equal alignment between the source and destination element types,
    // so an owned buffer can't be allocated as f32 and then converted to
    // an owned Vec<u8>/Box<[u8]> directly; instead byte views are
    // borrowed on demand via bytemuck::cast_slice(_mut), which only
    // requires the (already satisfied) target alignment to be no
    // stricter than the source's.
    data: Vec<f32>,
    stride: usize,
}

impl Plane {
    fn data_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    fn data_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.data)
    }
}

pub struct Image {
    params: ImageParams,
    planes: SmallVec<[Plane; 4]>,
}

fn alloc_floats(len: usize) -> Vec<f32> {
    vec![0f32; len.div_ceil(4)]
}

impl Image {
    pub fn alloc(fmt: PixelFormat, w: usize, h: usize) -> Image {
        Image::with_params(ImageParams::new(fmt, w, h))
    }

    pub fn with_params(params: ImageParams) -> Image {
        let desc = params.fmt.desc();
        // Allocate whole chroma macropixels plus a little row slack, so
        // aligned row-band converters may touch the pixels between the
        // logical size and the alignment grid.
        let aw = align_up(params.w, desc.align_x());
        let ah = align_up(params.h, desc.align_y());
        let mut planes = SmallVec::new();
        for p in 0..desc.num_planes {
            let pw = div_shift_up(aw, desc.xs(p));
            let ph = div_shift_up(ah, desc.ys(p));
            let stride = align_up(pw * desc.bytes_per_pixel(p), 16);
            planes.push(Plane {
                data: alloc_floats(stride * ph),
                stride,
            });
        }
        Image { params, planes }
    }

    pub fn params(&self) -> &ImageParams {
        &self.params
    }

    pub fn fmt(&self) -> PixelFormat {
        self.params.fmt
    }

    pub fn desc(&self) -> &'static FormatDesc {
        self.params.fmt.desc()
    }

    pub fn w(&self) -> usize {
        self.params.w
    }

    pub fn h(&self) -> usize {
        self.params.h
    }

    pub fn set_color(&mut self, color: Colorimetry) {
        self.params.color = color;
    }

    pub fn set_chroma_loc(&mut self, loc: ChromaLoc) {
        self.params.chroma_loc = loc;
    }

    pub fn set_alpha(&mut self, alpha: AlphaMode) {
        self.params.alpha = alpha;
    }

    /// Copy colorimetry, chroma siting and alpha mode; format and size
    /// stay as allocated.
    pub fn copy_attributes(&mut self, from: &ImageParams) {
        self.params.color = from.color;
        self.params.chroma_loc = from.chroma_loc;
        self.params.alpha = from.alpha;
    }

    pub fn plane_w(&self, p: usize) -> usize {
        div_shift_up(self.params.w, self.desc().xs(p))
    }

    pub fn plane_h(&self, p: usize) -> usize {
        div_shift_up(self.params.h, self.desc().ys(p))
    }

    pub fn row(&self, p: usize, y: usize) -> &[u8] {
        let pl = &self.planes[p];
        let stride = pl.stride;
        &pl.data_bytes()[y * stride..][..stride]
    }

    pub fn row_mut(&mut self, p: usize, y: usize) -> &mut [u8] {
        let stride = self.planes[p].stride;
        &mut self.planes[p].data_bytes_mut()[y * stride..][..stride]
    }

    pub fn row_u16(&self, p: usize, y: usize) -> &[u16] {
        bytemuck::cast_slice(self.row(p, y))
    }

    pub fn row_f32(&self, p: usize, y: usize) -> &[f32] {
        bytemuck::cast_slice(self.row(p, y))
    }

    pub fn row_f32_mut(&mut self, p: usize, y: usize) -> &mut [f32] {
        bytemuck::cast_slice_mut(self.row_mut(p, y))
    }

    /// Fill a pixel rectangle with the format's blank value: black
    /// luma/RGB, neutral chroma, transparent alpha.
    pub fn clear_rect(&mut self, x0: usize, y0: usize, x1: usize, y1: usize) {
        let desc = self.desc();
        assert!(x0 <= x1 && x1 <= self.params.w);
        assert!(y0 <= y1 && y1 <= self.params.h);

        for p in 0..desc.num_planes {
            let (xs, ys) = (desc.xs(p), desc.ys(p));
            let bpp = desc.bytes_per_pixel(p);
            let (px0, px1) = (x0 >> xs, div_shift_up(x1, xs));
            let blank = plane_blank_bytes(desc, p, self.params.color.levels);
            for y in (y0 >> ys)..div_shift_up(y1, ys) {
                let row = self.row_mut(p, y);
                for px in row[px0 * bpp..px1 * bpp].chunks_exact_mut(desc.component_size) {
                    let c = px.len().min(blank.len());
                    px[..c].copy_from_slice(&blank[..c]);
                }
            }
        }
    }

    /// Borrow a pixel rectangle. `x0`/`y0` must lie on the chroma grid;
    /// `x1`/`y1` must be aligned or coincide with the image edge.
    pub fn view(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> ImageView<'_> {
        let desc = self.desc();
        check_rect(&self.params, desc, x0, y0, x1, y1);
        let mut params = self.params;
        params.w = x1 - x0;
        params.h = y1 - y0;
        let planes = (0..desc.num_planes)
            .map(|p| {
                let pl = &self.planes[p];
                let bpp = desc.bytes_per_pixel(p);
                PlaneRef {
                    data: &pl.data_bytes()[(y0 >> desc.ys(p)) * pl.stride + (x0 >> desc.xs(p)) * bpp..],
                    stride: pl.stride,
                    w: div_shift_up(params.w, desc.xs(p)),
                    h: div_shift_up(params.h, desc.ys(p)),
                    bpp,
                }
            })
            .collect();
        ImageView { params, planes }
    }

    pub fn view_all(&self) -> ImageView<'_> {
        self.view(0, 0, self.params.w, self.params.h)
    }

    pub fn view_mut(&mut self, x0: usize, y0: usize, x1: usize, y1: usize) -> ImageViewMut<'_> {
        let desc = self.desc();
        check_rect(&self.params, desc, x0, y0, x1, y1);
        let mut params = self.params;
        params.w = x1 - x0;
        params.h = y1 - y0;
        let planes = self
            .planes
            .iter_mut()
            .enumerate()
            .take(desc.num_planes)
            .map(|(p, pl)| {
                let bpp = desc.bytes_per_pixel(p);
                let stride = pl.stride;
                let off = (y0 >> desc.ys(p)) * stride + (x0 >> desc.xs(p)) * bpp;
                PlaneMut {
                    data: &mut pl.data_bytes_mut()[off..],
                    stride,
                    w: div_shift_up(params.w, desc.xs(p)),
                    h: div_shift_up(params.h, desc.ys(p)),
                    bpp,
                }
            })
            .collect();
        ImageViewMut { params, planes }
    }

    pub fn view_all_mut(&mut self) -> ImageViewMut<'_> {
        let (w, h) = (self.params.w, self.params.h);
        self.view_mut(0, 0, w, h)
    }

    /// Reinterpret one full-resolution plane as a standalone image of
    /// `params.fmt` (a single-plane format of the same component size).
    /// The safe stand-in for aliasing an alpha plane as a gray image.
    pub fn plane_view(&self, p: usize, params: ImageParams) -> ImageView<'_> {
        let desc = self.desc();
        let want = params.fmt.desc();
        assert_eq!(want.num_planes, 1);
        assert_eq!(want.component_size, desc.component_size);
        assert_eq!(desc.xs(p), 0);
        assert_eq!(desc.ys(p), 0);
        assert_eq!(params.w, self.params.w);
        assert_eq!(params.h, self.params.h);
        let pl = &self.planes[p];
        ImageView {
            params,
            planes: std::iter::once(PlaneRef {
                data: pl.data_bytes(),
                stride: pl.stride,
                w: self.plane_w(p),
                h: self.plane_h(p),
                bpp: desc.bytes_per_pixel(p),
            })
            .collect(),
        }
    }
}

fn check_rect(params: &ImageParams, desc: &FormatDesc, x0: usize, y0: usize, x1: usize, y1: usize) {
    let (ax, ay) = (desc.align_x(), desc.align_y());
    assert!(x0 <= x1 && x1 <= params.w && y0 <= y1 && y1 <= params.h);
    assert!(x0 % ax == 0 && y0 % ay == 0);
    assert!(x1 % ax == 0 || x1 == params.w);
    assert!(y1 % ay == 0 || y1 == params.h);
}

fn plane_blank_bytes(desc: &FormatDesc, p: usize, levels: Levels) -> SmallVec<[u8; 4]> {
    match desc.component_type {
        ComponentType::Float => SmallVec::from_slice(&0f32.to_ne_bytes()),
        ComponentType::Uint => {
            let c = desc.planes[p].components[0];
            let v: u32 = if desc.plane_is_chroma(p) {
                128 << (desc.depth() - 8)
            } else if c == comp::A {
                0
            } else if desc.class != FormatClass::Rgb
                && levels == Levels::Limited
                && c == comp::R_Y
            {
                16 << (desc.depth() - 8)
            } else {
                0
            };
            match desc.component_size {
                1 => SmallVec::from_slice(&[v as u8]),
                2 => SmallVec::from_slice(&(v as u16).to_ne_bytes()),
                _ => unreachable!("unsupported uint component size"),
            }
        }
    }
}

/// Read access to one plane of a view.
pub struct PlaneRef<'a> {
    data: &'a [u8],
    stride: usize,
    w: usize,
    h: usize,
    bpp: usize,
}

impl PlaneRef<'_> {
    pub fn w(&self) -> usize {
        self.w
    }

    pub fn h(&self) -> usize {
        self.h
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.stride..][..self.w * self.bpp]
    }

    pub fn row_u16(&self, y: usize) -> &[u16] {
        bytemuck::cast_slice(self.row(y))
    }

    pub fn row_f32(&self, y: usize) -> &[f32] {
        bytemuck::cast_slice(self.row(y))
    }
}

/// Write access to one plane of a view.
pub struct PlaneMut<'a> {
    data: &'a mut [u8],
    stride: usize,
    w: usize,
    h: usize,
    bpp: usize,
}

impl PlaneMut<'_> {
    pub fn w(&self) -> usize {
        self.w
    }

    pub fn h(&self) -> usize {
        self.h
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.stride..][..self.w * self.bpp]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let off = y * self.stride;
        &mut self.data[off..][..self.w * self.bpp]
    }

    pub fn row_u16_mut(&mut self, y: usize) -> &mut [u16] {
        bytemuck::cast_slice_mut(self.row_mut(y))
    }

    pub fn row_f32_mut(&mut self, y: usize) -> &mut [f32] {
        bytemuck::cast_slice_mut(self.row_mut(y))
    }
}

pub struct ImageView<'a> {
    pub params: ImageParams,
    planes: SmallVec<[PlaneRef<'a>; 4]>,
}

impl<'a> ImageView<'a> {
    /// View over caller-provided packed BGRA bytes (e.g. an external
    /// overlay bitmap), premultiplied sRGB.
    pub fn from_bgra_premul(data: &'a [u8], stride: usize, w: usize, h: usize) -> ImageView<'a> {
        assert!(stride >= w * 4);
        assert!(data.len() >= (h - 1) * stride + w * 4);
        let mut params = ImageParams::new(PixelFormat::Bgra8, w, h);
        params.alpha = AlphaMode::Premul;
        ImageView {
            params,
            planes: std::iter::once(PlaneRef {
                data,
                stride,
                w,
                h,
                bpp: 4,
            })
            .collect(),
        }
    }

    pub fn desc(&self) -> &'static FormatDesc {
        self.params.fmt.desc()
    }

    pub fn plane(&self, p: usize) -> &PlaneRef<'a> {
        &self.planes[p]
    }

    /// Further crop, coordinates relative to this view.
    pub fn sub_view(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> ImageView<'_> {
        let desc = self.desc();
        check_rect(&self.params, desc, x0, y0, x1, y1);
        let mut params = self.params;
        params.w = x1 - x0;
        params.h = y1 - y0;
        let planes = self
            .planes
            .iter()
            .enumerate()
            .map(|(p, pl)| PlaneRef {
                data: &pl.data[(y0 >> desc.ys(p)) * pl.stride + (x0 >> desc.xs(p)) * pl.bpp..],
                stride: pl.stride,
                w: div_shift_up(params.w, desc.xs(p)),
                h: div_shift_up(params.h, desc.ys(p)),
                bpp: pl.bpp,
            })
            .collect();
        ImageView { params, planes }
    }
}

pub struct ImageViewMut<'a> {
    pub params: ImageParams,
    planes: SmallVec<[PlaneMut<'a>; 4]>,
}

impl<'a> ImageViewMut<'a> {
    pub fn desc(&self) -> &'static FormatDesc {
        self.params.fmt.desc()
    }

    pub fn plane_mut(&mut self, p: usize) -> &mut PlaneMut<'a> {
        &mut self.planes[p]
    }

    pub fn plane(&self, p: usize) -> &PlaneMut<'a> {
        &self.planes[p]
    }
}
