//! Software scaling and colorspace conversion.
//!
//! This is the converter backend behind overlay staging: premultiplied
//! BGRA resampling, BGRA to planar video-colorspace conversion with
//! chroma subsampling, gray-plane resampling for the chroma-sized alpha
//! plane, and the premultiply/unpremultiply passes used when the
//! destination carries straight alpha.
//!
//! Every public entry point bumps an invocation counter, so callers
//! (and tests) can observe how much conversion work a frame actually
//! performed.

use smallvec::SmallVec;

use crate::csp::{AlphaMode, ChromaLoc, Levels, Matrix};
use crate::error::{OsdError, OsdResult};
use crate::image::{ImageView, ImageViewMut};
use crate::imgfmt::{comp, norm_params, ComponentType, FormatDesc, PixelFormat};

pub struct Scaler {
    invocations: u64,
}

impl Default for Scaler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scaler {
    pub fn new() -> Self {
        Scaler { invocations: 0 }
    }

    /// Number of `scale` calls performed so far.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Whether `scale` can handle this format pair at all. Size and
    /// alpha-mode constraints are still checked per call.
    pub fn supports(&self, dst: PixelFormat, src: PixelFormat) -> bool {
        if src == dst {
            let d = dst.desc();
            return matches!(src, PixelFormat::Bgra8 | PixelFormat::Gray8)
                || (d.has_alpha && d.component_type == ComponentType::Uint && d.component_size == 1);
        }
        src == PixelFormat::Bgra8 && convertible_overlay_target(dst.desc())
    }

    pub fn scale(&mut self, dst: &mut ImageViewMut<'_>, src: &ImageView<'_>) -> OsdResult<()> {
        self.invocations += 1;

        let same_size = dst.params.w == src.params.w && dst.params.h == src.params.h;
        if dst.params.fmt == src.params.fmt {
            if same_size && dst.params.alpha != src.params.alpha && dst.desc().has_alpha {
                return alpha_convert(dst, src);
            }
            return match dst.params.fmt {
                PixelFormat::Bgra8 => {
                    resample_plane(dst, src, 0, 4);
                    Ok(())
                }
                PixelFormat::Gray8 => {
                    resample_plane(dst, src, 0, 1);
                    Ok(())
                }
                _ => Err(OsdError::scaler(format!(
                    "cannot resample {}",
                    dst.params.fmt.name()
                ))),
            };
        }

        if src.params.fmt == PixelFormat::Bgra8 && convertible_overlay_target(dst.desc()) {
            if !same_size {
                return Err(OsdError::scaler(
                    "format conversion requires equal sizes".to_string(),
                ));
            }
            return convert_bgra_to_planar(dst, src);
        }

        Err(OsdError::scaler(format!(
            "unsupported conversion {} -> {}",
            src.params.fmt.name(),
            dst.params.fmt.name()
        )))
    }
}

/// Formats the BGRA overlay can be converted into: 8-bit planar with an
/// alpha plane.
fn convertible_overlay_target(d: &FormatDesc) -> bool {
    d.component_type == ComponentType::Uint
        && d.component_size == 1
        && d.has_alpha
        && d.planes[..d.num_planes].iter().all(|p| p.num_components == 1)
}

/// Per-component quantization derived from `norm_params`.
#[derive(Clone, Copy)]
struct Quant {
    scale: f32,
    offset: f32,
    max: f32,
}

impl Quant {
    fn new(desc: &FormatDesc, component: u8, levels: Levels) -> Quant {
        let (scale, offset) = norm_params(desc, component, levels);
        Quant {
            scale,
            offset,
            max: desc.max_value() as f32,
        }
    }

    fn decode(self, v: u32) -> f32 {
        v as f32 * self.scale + self.offset
    }

    fn encode(self, f: f32) -> u8 {
        ((f - self.offset) / self.scale).round().clamp(0.0, self.max) as u8
    }
}

/// Contribution of source pixels to one destination pixel along one
/// axis: area average when shrinking, bilinear when stretching.
fn axis_weights(src_n: usize, dst_n: usize) -> Vec<(usize, SmallVec<[f32; 4]>)> {
    let mut out = Vec::with_capacity(dst_n);
    if dst_n == src_n {
        for i in 0..dst_n {
            out.push((i, SmallVec::from_slice(&[1.0])));
        }
    } else if dst_n < src_n {
        let step = src_n as f64 / dst_n as f64;
        for d in 0..dst_n {
            let f0 = d as f64 * step;
            let f1 = (d as f64 + 1.0) * step;
            let i0 = f0.floor() as usize;
            let i1 = (f1.ceil() as usize).min(src_n);
            let mut ws = SmallVec::new();
            for i in i0..i1 {
                let lo = f0.max(i as f64);
                let hi = f1.min(i as f64 + 1.0);
                ws.push(((hi - lo) / (f1 - f0)) as f32);
            }
            out.push((i0, ws));
        }
    } else {
        let step = src_n as f64 / dst_n as f64;
        for d in 0..dst_n {
            let center = (d as f64 + 0.5) * step - 0.5;
            if center <= 0.0 {
                out.push((0, SmallVec::from_slice(&[1.0])));
                continue;
            }
            let i0 = center.floor() as usize;
            if i0 + 1 >= src_n {
                out.push((src_n - 1, SmallVec::from_slice(&[1.0])));
            } else {
                let frac = (center - center.floor()) as f32;
                out.push((i0, SmallVec::from_slice(&[1.0 - frac, frac])));
            }
        }
    }
    out
}

/// Separable resampling of one interleaved u8 plane (`ch` channels).
/// Premultiplied data, so channels filter independently.
fn resample_plane(dst: &mut ImageViewMut<'_>, src: &ImageView<'_>, p: usize, ch: usize) {
    let (sw, sh) = (src.params.w, src.params.h);
    let (dw, dh) = (dst.params.w, dst.params.h);
    let sp = src.plane(p);

    let wx = axis_weights(sw, dw);
    let wy = axis_weights(sh, dh);

    // Horizontal pass into a float intermediate.
    let mut tmp = vec![0f32; dw * sh * ch];
    for y in 0..sh {
        let row = sp.row(y);
        let trow = &mut tmp[y * dw * ch..][..dw * ch];
        for (d, (start, ws)) in wx.iter().enumerate() {
            let mut acc = [0f32; 4];
            for (k, &w) in ws.iter().enumerate() {
                let px = &row[(start + k) * ch..][..ch];
                for c in 0..ch {
                    acc[c] += w * px[c] as f32;
                }
            }
            trow[d * ch..][..ch].copy_from_slice(&acc[..ch]);
        }
    }

    // Vertical pass with rounding.
    let dp = dst.plane_mut(p);
    for (dy, (start, ws)) in wy.iter().enumerate() {
        let drow = dp.row_mut(dy);
        for x in 0..dw * ch {
            let mut acc = 0f32;
            for (k, &w) in ws.iter().enumerate() {
                acc += w * tmp[(start + k) * dw * ch + x];
            }
            drow[x] = (acc + 0.5).clamp(0.0, 255.0) as u8;
        }
    }
}

/// Premultiplied normalized BGRA for the luma pixel at `(x, y)`.
fn bgra_at(src: &ImageView<'_>, x: usize, y: usize) -> [f32; 4] {
    let px = &src.plane(0).row(y)[x * 4..][..4];
    [
        px[0] as f32 / 255.0,
        px[1] as f32 / 255.0,
        px[2] as f32 / 255.0,
        px[3] as f32 / 255.0,
    ]
}

fn convert_bgra_to_planar(dst: &mut ImageViewMut<'_>, src: &ImageView<'_>) -> OsdResult<()> {
    let desc = dst.desc();
    let (w, h) = (dst.params.w, dst.params.h);
    let levels = dst.params.color.levels;
    let loc = dst.params.chroma_loc;
    let matrix = dst.params.color.matrix;

    let (kr, kb) = match matrix {
        Matrix::Rgb => {
            return Err(OsdError::scaler(
                "planar overlay target needs a YUV matrix".to_string(),
            ));
        }
        m => m.luma_weights().expect("non-RGB matrix has weights"),
    };
    let kg = 1.0 - kr - kb;

    let luma = |px: [f32; 4]| kr * px[2] + kg * px[1] + kb * px[0];

    for p in 0..desc.num_planes {
        let c = desc.planes[p].components[0];
        let q = Quant::new(desc, c, levels);
        let (xs, ys) = (desc.xs(p) as usize, desc.ys(p) as usize);

        if !matches!(c, comp::G_CB | comp::B_CR) || desc.class != crate::imgfmt::FormatClass::Yuv {
            let pl = dst.plane_mut(p);
            for y in 0..h {
                let drow = pl.row_mut(y);
                for x in 0..w {
                    let px = bgra_at(src, x, y);
                    let f = match c {
                        comp::A => px[3],
                        _ => luma(px),
                    };
                    drow[x] = q.encode(f);
                }
            }
        } else {
            // Chroma, possibly subsampled: average the centered
            // premultiplied chroma of the macropixel (or of its left
            // column).
            let cw = dst.plane(p).w();
            let chh = dst.plane(p).h();
            let chroma = |px: [f32; 4]| -> f32 {
                let y = luma(px);
                match c {
                    comp::G_CB => (px[0] - y) / (2.0 * (1.0 - kb)),
                    comp::B_CR => (px[2] - y) / (2.0 * (1.0 - kr)),
                    _ => unreachable!("chroma plane"),
                }
            };
            let pl = dst.plane_mut(p);
            for cy in 0..chh {
                let drow = pl.row_mut(cy);
                for cx in 0..cw {
                    let x0 = cx << xs;
                    let x1 = match loc {
                        ChromaLoc::Left => x0 + 1,
                        ChromaLoc::Center => ((cx + 1) << xs).min(w),
                    };
                    let y0 = cy << ys;
                    let y1 = ((cy + 1) << ys).min(h);
                    let mut acc = 0f32;
                    let mut n = 0f32;
                    for sy in y0..y1 {
                        for sx in x0..x1.min(w) {
                            acc += chroma(bgra_at(src, sx, sy));
                            n += 1.0;
                        }
                    }
                    drow[cx] = q.encode(if n > 0.0 { acc / n } else { 0.0 });
                }
            }
        }
    }
    Ok(())
}

fn alpha_convert(dst: &mut ImageViewMut<'_>, src: &ImageView<'_>) -> OsdResult<()> {
    let premultiply = dst.params.alpha == AlphaMode::Premul;
    let desc = dst.desc();
    let (w, h) = (dst.params.w, dst.params.h);

    if dst.params.fmt == PixelFormat::Bgra8 {
        let sp = src.plane(0);
        let dp = dst.plane_mut(0);
        for y in 0..h {
            let srow = sp.row(y);
            let drow = dp.row_mut(y);
            for x in 0..w {
                let px = &srow[x * 4..][..4];
                let a = px[3] as u32;
                let out = &mut drow[x * 4..][..4];
                for c in 0..3 {
                    let v = px[c] as u32;
                    out[c] = if premultiply {
                        ((v * a + 127) / 255) as u8
                    } else if a == 0 {
                        0
                    } else {
                        ((v * 255 + a / 2) / a).min(255) as u8
                    };
                }
                out[3] = px[3];
            }
        }
        return Ok(());
    }

    // Planar 8-bit with alpha plane. Chroma uses the alpha of its
    // macropixel, box-averaged.
    let levels = dst.params.color.levels;
    let apl = desc.num_planes - 1;
    let alpha_at = |x: usize, y: usize| src.plane(apl).row(y)[x] as f32 / 255.0;

    for p in 0..desc.num_planes {
        let c = desc.planes[p].components[0];
        if c == comp::A {
            let sp = src.plane(p);
            let dp = dst.plane_mut(p);
            for y in 0..sp.h() {
                let srow = sp.row(y);
                dp.row_mut(y).copy_from_slice(srow);
            }
            continue;
        }

        let q = Quant::new(desc, c, levels);
        let (xs, ys) = (desc.xs(p) as usize, desc.ys(p) as usize);
        let sp = src.plane(p);
        let (pw, ph) = (sp.w(), sp.h());
        // Borrow alpha rows before taking the mutable plane.
        let mut out_rows: Vec<Vec<u8>> = Vec::with_capacity(ph);
        for y in 0..ph {
            let srow = sp.row(y);
            let mut orow = vec![0u8; pw];
            for x in 0..pw {
                let mut a = 0f32;
                let mut n = 0f32;
                for sy in (y << ys)..((y + 1) << ys).min(h) {
                    for sx in (x << xs)..((x + 1) << xs).min(w) {
                        a += alpha_at(sx, sy);
                        n += 1.0;
                    }
                }
                let a = if n > 0.0 { a / n } else { 0.0 };
                let f = q.decode(srow[x] as u32);
                let f = if premultiply {
                    f * a
                } else if a > 0.0 {
                    f / a
                } else {
                    0.0
                };
                orow[x] = q.encode(f);
            }
            out_rows.push(orow);
        }
        let dp = dst.plane_mut(p);
        for (y, orow) in out_rows.into_iter().enumerate() {
            dp.row_mut(y).copy_from_slice(&orow);
        }
    }
    Ok(())
}
