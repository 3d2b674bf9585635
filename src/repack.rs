//! Row-band conversion between a storable pixel format and its
//! planar-float companion.
//!
//! One `Repack` handles one direction for one format pair. A call to
//! [`Repack::line`] moves a single aligned row band (one chroma
//! macropixel tall), which is the granularity the blender works at:
//! it never converts more of the frame than the dirty slice being
//! blended.
//!
//! Value mapping follows the compositor's blend contract: luma and RGB
//! are mapped to `[0,1]` honoring the nominal range, chroma is centered
//! at zero, alpha is always full range (see `imgfmt::norm_params`).

use crate::error::{OsdError, OsdResult};
use crate::image::{div_shift_up, Image};
use crate::imgfmt::{ComponentType, PixelFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepackDir {
    /// Storable format to planar float.
    ToFloat,
    /// Planar float back to the storable format.
    FromFloat,
}

pub struct Repack {
    fmt: PixelFormat,
    float_fmt: PixelFormat,
    dir: RepackDir,
    /// For packed formats: byte index within a packed pixel feeding
    /// each float plane.
    packed_map: Option<[usize; 4]>,
}

impl Repack {
    pub fn new_planar(fmt: PixelFormat, dir: RepackDir) -> OsdResult<Repack> {
        let float_fmt = fmt.float_companion();
        let desc = fmt.desc();
        let fdesc = float_fmt.desc();

        let packed = desc.num_planes == 1 && desc.planes[0].num_components > 1;
        let packed_map = if packed {
            let mut map = [0usize; 4];
            for (q, slot) in map.iter_mut().enumerate().take(fdesc.num_planes) {
                let c = fdesc.planes[q].components[0];
                let Some(i) = desc.planes[0]
                    .components
                    .iter()
                    .position(|&x| x == c)
                else {
                    return Err(OsdError::repack(format!(
                        "{} has no source byte for float plane {}",
                        desc.name, q
                    )));
                };
                *slot = i;
            }
            Some(map)
        } else {
            if desc.num_planes != fdesc.num_planes {
                return Err(OsdError::repack(format!(
                    "{} has no planar float companion",
                    desc.name
                )));
            }
            None
        };

        Ok(Repack {
            fmt,
            float_fmt,
            dir,
            packed_map,
        })
    }

    pub fn storable_format(&self) -> PixelFormat {
        self.fmt
    }

    pub fn float_format(&self) -> PixelFormat {
        self.float_fmt
    }

    pub fn src_format(&self) -> PixelFormat {
        match self.dir {
            RepackDir::ToFloat => self.fmt,
            RepackDir::FromFloat => self.float_fmt,
        }
    }

    pub fn dst_format(&self) -> PixelFormat {
        match self.dir {
            RepackDir::ToFloat => self.float_fmt,
            RepackDir::FromFloat => self.fmt,
        }
    }

    /// Pixel alignment of x coordinates and widths passed to [`line`].
    ///
    /// [`line`]: Repack::line
    pub fn align_x(&self) -> usize {
        self.fmt.desc().align_x()
    }

    /// Row-band height; y coordinates must be multiples of this.
    pub fn align_y(&self) -> usize {
        self.fmt.desc().align_y()
    }

    /// Convert one row band of `w` pixels. `(dst_x, dst_y)` and
    /// `(src_x, src_y)` are luma-resolution positions in the respective
    /// images; the band is `align_y()` luma rows tall.
    #[allow(clippy::too_many_arguments)]
    pub fn line(
        &self,
        dst: &mut Image,
        src: &Image,
        dst_x: usize,
        dst_y: usize,
        src_x: usize,
        src_y: usize,
        w: usize,
    ) {
        assert_eq!(src.fmt(), self.src_format());
        assert_eq!(dst.fmt(), self.dst_format());
        let (ax, ay) = (self.align_x(), self.align_y());
        assert!(src_x % ax == 0 && dst_x % ax == 0 && src_y % ay == 0 && dst_y % ay == 0);

        let (stor, float, stor_x, stor_y, f_x, f_y) = match self.dir {
            RepackDir::ToFloat => (src.params(), dst.params(), src_x, src_y, dst_x, dst_y),
            RepackDir::FromFloat => (dst.params(), src.params(), dst_x, dst_y, src_x, src_y),
        };
        let sdesc = stor.fmt.desc();
        let fdesc = float.fmt.desc();
        let levels = stor.color.levels;

        for q in 0..fdesc.num_planes {
            let (xs, ys) = (fdesc.xs(q), fdesc.ys(q));
            let rows = ay >> ys;
            let pw = div_shift_up(w, xs);
            let (sp, byte) = match self.packed_map {
                Some(map) => (0, map[q]),
                None => (q, 0),
            };
            let c = fdesc.planes[q].components[0];

            for r in 0..rows {
                let sy = (stor_y >> ys) + r;
                let fy = (f_y >> ys) + r;
                let fx = f_x >> xs;
                let sx = stor_x >> xs;

                match self.dir {
                    RepackDir::ToFloat => {
                        if sdesc.component_type == ComponentType::Float {
                            let srow = src.row_f32(sp, sy);
                            let drow = dst.row_f32_mut(q, fy);
                            drow[fx..fx + pw].copy_from_slice(&srow[sx..sx + pw]);
                            continue;
                        }
                        let (scale, offset) = crate::imgfmt::norm_params(sdesc, c, levels);
                        match (sdesc.component_size, self.packed_map) {
                            (1, Some(_)) => {
                                let srow = src.row(sp, sy);
                                let drow = dst.row_f32_mut(q, fy);
                                for i in 0..pw {
                                    let v = srow[(sx + i) * 4 + byte];
                                    drow[fx + i] = v as f32 * scale + offset;
                                }
                            }
                            (1, None) => {
                                let srow = src.row(sp, sy);
                                let drow = dst.row_f32_mut(q, fy);
                                for i in 0..pw {
                                    drow[fx + i] = srow[sx + i] as f32 * scale + offset;
                                }
                            }
                            (2, None) => {
                                let srow = src.row_u16(sp, sy);
                                let drow = dst.row_f32_mut(q, fy);
                                for i in 0..pw {
                                    drow[fx + i] = srow[sx + i] as f32 * scale + offset;
                                }
                            }
                            _ => unreachable!("unsupported storable layout"),
                        }
                    }
                    RepackDir::FromFloat => {
                        if sdesc.component_type == ComponentType::Float {
                            let srow = src.row_f32(q, fy);
                            let seg = &srow[fx..fx + pw];
                            dst.row_f32_mut(sp, sy)[sx..sx + pw].copy_from_slice(seg);
                            continue;
                        }
                        let (scale, offset) = crate::imgfmt::norm_params(sdesc, c, levels);
                        let max = sdesc.max_value() as f32;
                        let unquant = |f: f32| -> u32 {
                            ((f - offset) / scale).round().clamp(0.0, max) as u32
                        };
                        let srow = src.row_f32(q, fy);
                        match (sdesc.component_size, self.packed_map) {
                            (1, Some(_)) => {
                                let drow = dst.row_mut(sp, sy);
                                for i in 0..pw {
                                    drow[(sx + i) * 4 + byte] = unquant(srow[fx + i]) as u8;
                                }
                            }
                            (1, None) => {
                                let drow = dst.row_mut(sp, sy);
                                for i in 0..pw {
                                    drow[sx + i] = unquant(srow[fx + i]) as u8;
                                }
                            }
                            (2, None) => {
                                let drow = bytemuck::cast_slice_mut::<u8, u16>(dst.row_mut(sp, sy));
                                for i in 0..pw {
                                    drow[sx + i] = unquant(srow[fx + i]) as u16;
                                }
                            }
                            _ => unreachable!("unsupported storable layout"),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csp::Levels;
    use crate::imgfmt::PixelFormat;

    #[test]
    fn bgra_unpacks_to_gbrap_planes() {
        let rp = Repack::new_planar(PixelFormat::Bgra8, RepackDir::ToFloat).unwrap();
        assert_eq!(rp.dst_format(), PixelFormat::Gbrapf32);

        let mut src = Image::alloc(PixelFormat::Bgra8, 2, 1);
        src.row_mut(0, 0)[..8].copy_from_slice(&[255, 0, 0, 255, 0, 255, 0, 128]);
        let mut dst = Image::alloc(PixelFormat::Gbrapf32, 2, 1);

        rp.line(&mut dst, &src, 0, 0, 0, 0, 2);

        // Plane order G, B, R, A.
        assert_eq!(&dst.row_f32(0, 0)[..2], &[0.0, 1.0]);
        assert_eq!(&dst.row_f32(1, 0)[..2], &[1.0, 0.0]);
        assert_eq!(&dst.row_f32(2, 0)[..2], &[0.0, 0.0]);
        let a = dst.row_f32(3, 0);
        assert_eq!(a[0], 1.0);
        assert!((a[1] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn limited_yuv_maps_to_expanded_float() {
        let rp = Repack::new_planar(PixelFormat::Yuv420p8, RepackDir::ToFloat).unwrap();
        let mut src = Image::alloc(PixelFormat::Yuv420p8, 2, 2);
        assert_eq!(src.params().color.levels, Levels::Limited);
        src.row_mut(0, 0)[..2].copy_from_slice(&[16, 235]);
        src.row_mut(0, 1)[..2].copy_from_slice(&[16, 16]);
        src.row_mut(1, 0)[0] = 128;
        src.row_mut(2, 0)[0] = 240;
        let mut dst = Image::alloc(PixelFormat::Yuv420pf32, 2, 2);

        rp.line(&mut dst, &src, 0, 0, 0, 0, 2);

        assert!((dst.row_f32(0, 0)[0]).abs() < 1e-6);
        assert!((dst.row_f32(0, 0)[1] - 1.0).abs() < 1e-6);
        assert!((dst.row_f32(1, 0)[0]).abs() < 1e-6);
        assert!((dst.row_f32(2, 0)[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn roundtrip_is_exact_for_every_stored_value() {
        // To-float then from-float must restore each stored value
        // bit-exactly, limited or full range.
        for levels in [Levels::Limited, Levels::Full] {
            let to = Repack::new_planar(PixelFormat::Yuva444p8, RepackDir::ToFloat).unwrap();
            let from = Repack::new_planar(PixelFormat::Yuva444p8, RepackDir::FromFloat).unwrap();

            let mut src = Image::alloc(PixelFormat::Yuva444p8, 256, 1);
            let mut color = src.params().color;
            color.levels = levels;
            src.set_color(color);
            for p in 0..4 {
                for x in 0..256 {
                    src.row_mut(p, 0)[x] = x as u8;
                }
            }

            let mut f = Image::alloc(PixelFormat::Yuva444pf32, 256, 1);
            let mut back = Image::alloc(PixelFormat::Yuva444p8, 256, 1);
            back.set_color(color);

            to.line(&mut f, &src, 0, 0, 0, 0, 256);
            from.line(&mut back, &f, 0, 0, 0, 0, 256);

            for p in 0..4 {
                assert_eq!(&src.row(p, 0)[..256], &back.row(p, 0)[..256], "plane {p}");
            }
        }
    }

    #[test]
    fn ten_bit_roundtrip() {
        let to = Repack::new_planar(PixelFormat::Yuv420p10, RepackDir::ToFloat).unwrap();
        let from = Repack::new_planar(PixelFormat::Yuv420p10, RepackDir::FromFloat).unwrap();
        assert_eq!(to.dst_format(), PixelFormat::Yuv420pf32);

        let mut src = Image::alloc(PixelFormat::Yuv420p10, 1024, 2);
        for x in 0..1024 {
            src.row_mut(0, 0)[x * 2..x * 2 + 2]
                .copy_from_slice(&(x as u16).to_ne_bytes());
        }
        let mut f = Image::alloc(PixelFormat::Yuv420pf32, 1024, 2);
        let mut back = Image::alloc(PixelFormat::Yuv420p10, 1024, 2);

        to.line(&mut f, &src, 0, 0, 0, 0, 1024);
        from.line(&mut back, &f, 0, 0, 0, 0, 1024);

        assert_eq!(&src.row_u16(0, 0)[..1024], &back.row_u16(0, 0)[..1024]);
    }

    #[test]
    fn offset_band_converts_the_right_region() {
        let rp = Repack::new_planar(PixelFormat::Yuv420p8, RepackDir::ToFloat).unwrap();
        let mut src = Image::alloc(PixelFormat::Yuv420p8, 8, 4);
        src.row_mut(0, 2)[4] = 235;
        src.row_mut(1, 1)[2] = 240;
        let mut dst = Image::alloc(PixelFormat::Yuv420pf32, 8, 4);

        // Slice of width 4 at (4, 2), written to the left edge of the
        // scratch image, like the blender does.
        rp.line(&mut dst, &src, 0, 0, 4, 2, 4);

        assert!((dst.row_f32(0, 0)[0] - 1.0).abs() < 1e-6);
        assert!((dst.row_f32(1, 0)[0] - 0.5).abs() < 1e-6);
    }
}
