//! The compositor cache: pipeline construction, overlay rendering and
//! conversion, and per-slice blending into the destination frame.
//!
//! One [`Compositor`] memoizes everything derived from the destination
//! parameters (intermediate images, repack and scaler contexts) and
//! from the overlay inputs (the rendered RGBA overlay, its video-space
//! conversion, pre-scaled BGRA parts). A `composite` call revalidates
//! the cache, re-renders only when the input list's change id moved,
//! and blends only the dirty slices recorded by the dirty map.

use tracing::{debug, trace};

use crate::csp::{AlphaMode, ChromaLoc, Levels, Matrix};
use crate::draw::{draw_ass_bgra, draw_bgra_premul};
use crate::error::{OsdError, OsdResult};
use crate::image::{align_up, div_shift_up, Image, ImageParams, ImageView};
use crate::imgfmt::{
    comp, find_planar_format, ComponentType, PixelFormat, PlaneDesc, MAX_PLANES,
};
use crate::osd::{BgraPart, OverlayItem, OverlayList, OverlayParts, MAX_OSD_PARTS};
use crate::repack::{Repack, RepackDir};
use crate::scale::Scaler;
use crate::slices::{SliceMap, SLICE_W, TILE_H};

#[derive(Clone, Copy, Debug)]
pub struct ComposeOptions {
    /// Convert the overlay to video colorspace tile-by-tile, skipping
    /// clean tiles. Faster for sparse overlays; forces chroma siting to
    /// center. Only takes effect for subsampled destinations.
    pub scale_in_tiles: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        ComposeOptions {
            scale_in_tiles: true,
        }
    }
}

/// Counters for observing cache effectiveness. Reset when the pipeline
/// is rebuilt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComposeStats {
    /// Scaler invocations across all conversion stages.
    pub scale_calls: u64,
}

fn blend_line_f32(dst: &mut [f32], src: &[f32], src_a: &[f32]) {
    for ((d, &s), &a) in dst.iter_mut().zip(src).zip(src_a) {
        *d = s + *d * (1.0 - a);
    }
}

type BlendLineFn = fn(&mut [f32], &[f32], &[f32]);

struct PartEntry {
    change_id: Option<u64>,
    /// Pre-scaled bitmaps, one slot per part of the item.
    images: Vec<Option<Image>>,
}

struct Pipeline {
    params: ImageParams,
    /// `params.w/h` rounded up to the pixel alignment.
    w: usize,
    h: usize,
    align_x: usize,
    align_y: usize,
    scale_in_tiles: bool,
    change_id: Option<u64>,
    parts: Vec<PartEntry>,

    /// All OSD rendered in premultiplied sRGB BGRA.
    rgba_overlay: Image,
    /// `rgba_overlay` converted to video colorspace; absent when the
    /// destination is RGB and the overlay can be blended directly.
    video_overlay: Option<Image>,
    /// Plane of `video_overlay` holding alpha, and the gray format its
    /// view uses. Meaningful when `calpha_overlay` is present.
    alpha_plane: usize,
    calpha_fmt: PixelFormat,
    /// The alpha plane downsampled to chroma resolution.
    calpha_overlay: Option<Image>,

    slices: SliceMap,

    rgba_to_overlay: Option<Scaler>,
    alpha_to_calpha: Option<Scaler>,
    sub_scale: Scaler,

    overlay_to_f32: Repack,
    overlay_tmp: Image,
    calpha_to_f32: Option<Repack>,
    calpha_tmp: Option<Image>,
    video_to_f32: Repack,
    video_from_f32: Repack,
    video_tmp: Image,

    premul: Option<Scaler>,
    unpremul: Option<Scaler>,
    premul_tmp: Option<Image>,

    blend_line: BlendLineFn,
}

pub struct Compositor {
    opts: ComposeOptions,
    pipeline: Option<Pipeline>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Compositor {
        Compositor::with_options(ComposeOptions::default())
    }

    pub fn with_options(opts: ComposeOptions) -> Compositor {
        Compositor {
            opts,
            pipeline: None,
        }
    }

    /// Blend `list` onto `dst`, rebuilding cached state as needed. On
    /// error the destination may be partially blended and the cache is
    /// reset, so the next call starts from scratch.
    ///
    /// The destination must be at least as large as the list's bounding
    /// size; violating that is a programming error.
    pub fn composite(&mut self, dst: &mut Image, list: &OverlayList<'_>) -> OsdResult<()> {
        assert!(
            dst.w() >= list.w && dst.h() >= list.h,
            "destination smaller than the overlay list bounds"
        );

        let r = self.composite_inner(dst, list);
        if r.is_err() {
            self.pipeline = None;
        }
        r
    }

    fn composite_inner(&mut self, dst: &mut Image, list: &OverlayList<'_>) -> OsdResult<()> {
        let rebuild = match &self.pipeline {
            Some(p) => p.params != *dst.params(),
            None => true,
        };
        if rebuild {
            self.pipeline = Some(Pipeline::build(*dst.params(), &self.opts)?);
        }
        let p = self.pipeline.as_mut().expect("pipeline just built");

        if p.change_id != Some(list.change_id) {
            p.change_id = Some(list.change_id);
            trace!(change_id = list.change_id, items = list.items.len(), "re-rendering overlay");

            p.clear_overlay();
            for item in list.items {
                p.render_item(item)?;
            }
            p.convert_to_video_overlay()?;
        }

        if p.slices.any_marked() && p.premul_tmp.is_some() {
            let mut tmp = p.premul_tmp.take().expect("checked above");
            p.premul
                .as_mut()
                .expect("premul pass implies scaler")
                .scale(&mut tmp.view_all_mut(), &dst.view_all())?;
            p.blend_overlay(&mut tmp)?;
            p.unpremul
                .as_mut()
                .expect("premul pass implies scaler")
                .scale(&mut dst.view_all_mut(), &tmp.view_all())?;
            p.premul_tmp = Some(tmp);
        } else {
            p.blend_overlay(dst)?;
        }

        Ok(())
    }

    /// False iff the current overlay is known entirely transparent.
    pub fn any_osd(&self) -> bool {
        self.pipeline
            .as_ref()
            .is_some_and(|p| p.slices.any_marked())
    }

    pub fn stats(&self) -> ComposeStats {
        let Some(p) = &self.pipeline else {
            return ComposeStats::default();
        };
        let opt = |s: &Option<Scaler>| s.as_ref().map_or(0, Scaler::invocations);
        ComposeStats {
            scale_calls: p.sub_scale.invocations()
                + opt(&p.rgba_to_overlay)
                + opt(&p.alpha_to_calpha)
                + opt(&p.premul)
                + opt(&p.unpremul),
        }
    }

    /// One line describing the chosen intermediate formats and
    /// alignment, for logs and bug reports.
    pub fn debug_info(&self) -> String {
        let Some(p) = &self.pipeline else {
            return "uninitialized".to_string();
        };
        let name = |img: &Option<Image>| img.as_ref().map_or("-", |i| i.fmt().name());
        format!(
            "align={}:{} ov={:7} ov_f={}, v_f={}, a={}, ca={}, ca_f={}",
            p.align_x,
            p.align_y,
            name(&p.video_overlay),
            p.overlay_tmp.fmt().name(),
            p.video_tmp.fmt().name(),
            if p.calpha_overlay.is_some() {
                p.calpha_fmt.name()
            } else {
                "-"
            },
            name(&p.calpha_overlay),
            p.calpha_tmp.as_ref().map_or("-", |i| i.fmt().name()),
        )
    }
}

/// One-shot compositing without a persistent cache.
pub fn composite_once(dst: &mut Image, list: &OverlayList<'_>) -> OsdResult<()> {
    Compositor::new().composite(dst, list)
}

impl Pipeline {
    fn build(params: ImageParams, opts: &ComposeOptions) -> OsdResult<Pipeline> {
        let desc = params.fmt.desc();

        let need_premul = params.alpha != AlphaMode::Premul && desc.has_alpha;

        let video_to_f32 = Repack::new_planar(params.fmt, RepackDir::ToFloat)?;
        let video_from_f32 = Repack::new_planar(params.fmt, RepackDir::FromFloat)?;
        assert_eq!(video_to_f32.dst_format(), video_from_f32.src_format());

        let vid_f32 = video_to_f32.float_format();
        let vfdesc = vid_f32.desc();

        // Find an intermediate format for the video-space overlay: same
        // subsampling, has alpha, 8 bit is plenty. RGB destinations with
        // enough planes need no conversion at all.
        let mut scale_in_tiles = opts.scale_in_tiles;
        let overlay_fmt = if params.color.matrix == Matrix::Rgb && vfdesc.num_planes >= 3 {
            scale_in_tiles = false;
            PixelFormat::Bgra8
        } else {
            let mut odesc = vid_f32.planar_desc();
            odesc.component_type = ComponentType::Uint;
            odesc.component_size = 1;
            odesc.component_pad = 0;

            if odesc.planes[odesc.num_planes - 1].components[0] != comp::A {
                if odesc.num_planes >= MAX_PLANES {
                    return Err(OsdError::unsupported(
                        "no room for an overlay alpha plane",
                    ));
                }
                odesc.planes[odesc.num_planes] = PlaneDesc {
                    num_components: 1,
                    components: [comp::A, 0, 0, 0],
                };
                odesc.num_planes += 1;
            }

            scale_in_tiles &= odesc.chroma_xs != 0 || odesc.chroma_ys != 0;
            find_planar_format(&odesc).ok_or_else(|| {
                OsdError::unsupported(format!(
                    "no overlay companion format for {}",
                    params.fmt.name()
                ))
            })?
        };

        let overlay_to_f32 = Repack::new_planar(overlay_fmt, RepackDir::ToFloat)?;
        let render_fmt = overlay_to_f32.float_format();
        let ofdesc = render_fmt.desc();

        if ofdesc.planes[ofdesc.num_planes - 1].components[0] != comp::A {
            return Err(OsdError::unsupported("overlay format lacks alpha"));
        }
        // Same layout as the video's float format, minus possibly alpha.
        if ofdesc.num_planes != vfdesc.num_planes && ofdesc.num_planes != vfdesc.num_planes + 1 {
            return Err(OsdError::unsupported("overlay plane count mismatch"));
        }
        for n in 0..vfdesc.num_planes {
            if vfdesc.planes[n].components[0] != ofdesc.planes[n].components[0] {
                return Err(OsdError::unsupported("overlay plane layout mismatch"));
            }
        }

        let align_x = video_to_f32.align_x();
        let align_y = video_to_f32.align_y();
        assert!(align_x >= overlay_to_f32.align_x());
        assert!(align_y >= overlay_to_f32.align_y());
        if align_x > SLICE_W || align_y > TILE_H {
            return Err(OsdError::unsupported("destination alignment too coarse"));
        }

        let w = align_up(params.w, align_x);
        let h = align_up(params.h, align_y);

        // Overlay buffer size: rounded up to whole tiles when scaling in
        // tiles, so edge tiles don't need their own scaler setup.
        let (ow, oh) = if scale_in_tiles {
            (align_up(w, SLICE_W), align_up(h, TILE_H))
        } else {
            (w, h)
        };

        let mut rgba_overlay = Image::alloc(PixelFormat::Bgra8, ow, oh);
        rgba_overlay.set_alpha(AlphaMode::Premul);

        let mut overlay_tmp = Image::alloc(render_fmt, SLICE_W, align_y);
        overlay_tmp.set_color(params.color);
        let mut video_tmp = Image::alloc(vid_f32, SLICE_W, align_y);
        video_tmp.set_color(params.color);

        let mut video_overlay = None;
        let mut rgba_to_overlay = None;
        let mut alpha_to_calpha = None;
        let mut alpha_plane = 0;
        let mut calpha_fmt = PixelFormat::Gray8;
        let mut calpha_overlay = None;
        let mut calpha_to_f32 = None;
        let mut calpha_tmp = None;

        if overlay_fmt != PixelFormat::Bgra8 {
            let mut vo_params = ImageParams::new(overlay_fmt, ow, oh);
            vo_params.color = params.color;
            vo_params.alpha = AlphaMode::Premul;
            vo_params.chroma_loc = if scale_in_tiles {
                // Tile-local scaling can't honor a global siting.
                ChromaLoc::Center
            } else {
                params.chroma_loc
            };
            let vo = Image::with_params(vo_params);

            let sc = Scaler::new();
            if !sc.supports(overlay_fmt, PixelFormat::Bgra8) {
                return Err(OsdError::unsupported(format!(
                    "scaler cannot produce {}",
                    overlay_fmt.name()
                )));
            }

            let odesc = overlay_fmt.desc();
            let (xs, ys) = (odesc.chroma_xs, odesc.chroma_ys);
            if xs != 0 || ys != 0 {
                // A chroma-sized alpha plane is needed; expose the alpha
                // plane as a gray image and downscale it.
                alpha_plane = odesc.num_planes - 1;
                assert_eq!(odesc.planes[alpha_plane].components[0], comp::A);

                let mut cadesc = overlay_fmt.planar_desc();
                cadesc.num_planes = 1;
                cadesc.planes = [PlaneDesc::EMPTY; MAX_PLANES];
                cadesc.planes[0] = PlaneDesc {
                    num_components: 1,
                    components: [comp::R_Y, 0, 0, 0],
                };
                cadesc.chroma_xs = 0;
                cadesc.chroma_ys = 0;
                calpha_fmt = find_planar_format(&cadesc).ok_or_else(|| {
                    OsdError::unsupported("no gray companion for the alpha plane")
                })?;

                let mut ca_params =
                    ImageParams::new(calpha_fmt, ow >> xs, oh >> ys);
                ca_params.color.levels = Levels::Full;
                calpha_overlay = Some(Image::with_params(ca_params));

                let ca_repack = Repack::new_planar(calpha_fmt, RepackDir::ToFloat)?;
                let mut ct = Image::alloc(ca_repack.float_format(), SLICE_W, 1);
                let mut ct_color = ct.params().color;
                ct_color.levels = Levels::Full;
                ct.set_color(ct_color);
                calpha_tmp = Some(ct);
                calpha_to_f32 = Some(ca_repack);

                let ac = Scaler::new();
                if !ac.supports(calpha_fmt, calpha_fmt) {
                    return Err(OsdError::unsupported("scaler cannot resample alpha"));
                }
                alpha_to_calpha = Some(ac);
            }

            video_overlay = Some(vo);
            rgba_to_overlay = Some(sc);
        }

        let slices = SliceMap::new(ow, oh, w, h, align_x, align_y);

        let (premul, unpremul, premul_tmp) = if need_premul {
            let pm = Scaler::new();
            if !pm.supports(params.fmt, params.fmt) {
                return Err(OsdError::unsupported(format!(
                    "no premultiply support for {}",
                    params.fmt.name()
                )));
            }
            let mut pt = Image::with_params(params);
            pt.set_alpha(AlphaMode::Premul);
            (Some(pm), Some(Scaler::new()), Some(pt))
        } else {
            (None, None, None)
        };

        debug!(
            fmt = params.fmt.name(),
            overlay = overlay_fmt.name(),
            render = render_fmt.name(),
            align_x,
            align_y,
            scale_in_tiles,
            need_premul,
            "compositor pipeline built"
        );

        Ok(Pipeline {
            params,
            w,
            h,
            align_x,
            align_y,
            scale_in_tiles,
            change_id: None,
            parts: (0..MAX_OSD_PARTS)
                .map(|_| PartEntry {
                    change_id: None,
                    images: Vec::new(),
                })
                .collect(),
            rgba_overlay,
            video_overlay,
            alpha_plane,
            calpha_fmt,
            calpha_overlay,
            slices,
            rgba_to_overlay,
            alpha_to_calpha,
            sub_scale: Scaler::new(),
            overlay_to_f32,
            overlay_tmp,
            calpha_to_f32,
            calpha_tmp,
            video_to_f32,
            video_from_f32,
            video_tmp,
            premul,
            unpremul,
            premul_tmp,
            blend_line: blend_line_f32,
        })
    }

    fn clear_overlay(&mut self) {
        let Pipeline {
            rgba_overlay,
            slices,
            ..
        } = self;
        slices.clear_with(|y, x0, x1| {
            rgba_overlay.row_mut(0, y)[x0 * 4..x1 * 4].fill(0);
        });
    }

    fn render_item(&mut self, item: &OverlayItem<'_>) -> OsdResult<()> {
        assert!(item.render_index < MAX_OSD_PARTS);
        match item.parts {
            OverlayParts::Ass(parts) => {
                for s in parts {
                    assert!(s.x >= 0 && s.y >= 0, "libass parts are pre-positioned");
                    let (x, y) = (s.x as usize, s.y as usize);
                    draw_ass_bgra(
                        &mut self.rgba_overlay,
                        x,
                        y,
                        s.bitmap,
                        s.stride,
                        s.w,
                        s.h,
                        s.color,
                    );
                    self.slices.mark_rect(x, y, x + s.w, y + s.h);
                }
                Ok(())
            }
            OverlayParts::Bgra(parts) => {
                self.render_bgra(item.render_index, item.change_id, parts)
            }
            OverlayParts::Empty => Err(OsdError::unsupported("overlay item without bitmaps")),
        }
    }

    fn render_bgra(
        &mut self,
        index: usize,
        change_id: u64,
        parts: &[BgraPart<'_>],
    ) -> OsdResult<()> {
        let Pipeline {
            parts: cache,
            sub_scale,
            rgba_overlay,
            slices,
            w,
            h,
            ..
        } = self;

        let entry = &mut cache[index];
        if entry.change_id != Some(change_id) {
            entry.images.clear();
            entry.images.resize_with(parts.len(), || None);
            entry.change_id = Some(change_id);
        }
        assert_eq!(entry.images.len(), parts.len());

        for (i, s) in parts.iter().enumerate() {
            // Clipping is rare but necessary.
            let dx0 = s.x;
            let dy0 = s.y;
            let dx1 = s.x + s.dw as i32;
            let dy1 = s.y + s.dh as i32;

            let x0 = dx0.clamp(0, *w as i32);
            let y0 = dy0.clamp(0, *h as i32);
            let x1 = dx1.clamp(0, *w as i32);
            let y1 = dy1.clamp(0, *h as i32);

            let dw = (x1 - x0).max(0) as usize;
            let dh = (y1 - y0).max(0) as usize;
            if dw == 0 || dh == 0 {
                continue;
            }

            // Clip the source rather than the scaled output, so an
            // extreme scale factor can't force a huge intermediate.
            let (mut sx, mut sy, mut sw, mut sh) = (0usize, 0usize, s.w, s.h);
            if x0 != dx0 || y0 != dy0 || x1 != dx1 || y1 != dy1 {
                let fx = s.dw as f64 / s.w as f64;
                let fy = s.dh as f64 / s.h as f64;
                sx = (((x0 - dx0) as f64 / fx) as i64).clamp(0, s.w as i64) as usize;
                sy = (((y0 - dy0) as f64 / fy) as i64).clamp(0, s.h as i64) as usize;
                sw = ((dw as f64 / fx) as i64).clamp(1, s.w as i64) as usize;
                sh = ((dh as f64 / fy) as i64).clamp(1, s.h as i64) as usize;
            }
            assert!(sx + sw <= s.w && sy + sh <= s.h);

            let (x0, y0) = (x0 as usize, y0 as usize);
            if dw != sw || dh != sh {
                if entry.images[i].is_none() {
                    let src =
                        ImageView::from_bgra_premul(&s.bitmap[sy * s.stride + sx * 4..], s.stride, sw, sh);
                    let mut scaled = Image::alloc(PixelFormat::Bgra8, dw, dh);
                    scaled.set_alpha(AlphaMode::Premul);
                    sub_scale.scale(&mut scaled.view_all_mut(), &src)?;
                    entry.images[i] = Some(scaled);
                }
                let scaled = entry.images[i].as_ref().expect("filled above");
                assert_eq!(scaled.w(), dw);
                assert_eq!(scaled.h(), dh);

                for j in 0..dh {
                    draw_bgra_premul(
                        rgba_overlay,
                        x0,
                        y0 + j,
                        &scaled.row(0, j)[..dw * 4],
                        0,
                        dw,
                        1,
                    );
                }
            } else {
                draw_bgra_premul(
                    rgba_overlay,
                    x0,
                    y0,
                    &s.bitmap[sy * s.stride + sx * 4..],
                    s.stride,
                    dw,
                    dh,
                );
            }

            slices.mark_rect(x0, y0, x0 + dw, y0 + dh);
        }

        Ok(())
    }

    fn convert_to_video_overlay(&mut self) -> OsdResult<()> {
        let Pipeline {
            rgba_overlay,
            video_overlay,
            rgba_to_overlay,
            alpha_to_calpha,
            alpha_plane,
            calpha_fmt,
            calpha_overlay,
            slices,
            scale_in_tiles,
            ..
        } = self;

        let Some(vo) = video_overlay.as_mut() else {
            return Ok(());
        };
        let sc = rgba_to_overlay
            .as_mut()
            .expect("video overlay implies a converter");

        let mut convert_part = |x0: usize, y0: usize, pw: usize, ph: usize| -> OsdResult<()> {
            sc.scale(
                &mut vo.view_mut(x0, y0, x0 + pw, y0 + ph),
                &rgba_overlay.view(x0, y0, x0 + pw, y0 + ph),
            )?;

            if let Some(ca) = calpha_overlay.as_mut() {
                let (xs, ys) = (vo.desc().chroma_xs, vo.desc().chroma_ys);
                let mut gray_params = ImageParams::new(*calpha_fmt, vo.w(), vo.h());
                gray_params.color.levels = Levels::Full;
                let alpha_plane_view = vo.plane_view(*alpha_plane, gray_params);
                let alpha_view = alpha_plane_view.sub_view(x0, y0, x0 + pw, y0 + ph);
                let mut dst = ca.view_mut(x0 >> xs, y0 >> ys, (x0 + pw) >> xs, (y0 + ph) >> ys);
                alpha_to_calpha
                    .as_mut()
                    .expect("chroma alpha implies a resampler")
                    .scale(&mut dst, &alpha_view)?;
            }
            Ok(())
        };

        if *scale_in_tiles {
            let t_h = rgba_overlay.h() / TILE_H;
            for ty in 0..t_h {
                for sx in 0..slices.s_w() {
                    // A tile needs conversion iff any of its rows has a
                    // dirty slice in the tile's column.
                    let dirty = (0..TILE_H)
                        .any(|r| !slices.row(ty * TILE_H + r)[sx].is_empty());
                    if !dirty {
                        continue;
                    }
                    convert_part(sx * SLICE_W, ty * TILE_H, SLICE_W, TILE_H)?;
                }
            }
        } else {
            convert_part(0, 0, rgba_overlay.w(), rgba_overlay.h())?;
        }

        Ok(())
    }

    fn blend_overlay(&mut self, dst: &mut Image) -> OsdResult<()> {
        let Pipeline {
            w,
            h,
            align_x,
            align_y,
            rgba_overlay,
            video_overlay,
            calpha_overlay,
            slices,
            overlay_to_f32,
            overlay_tmp,
            calpha_to_f32,
            calpha_tmp,
            video_to_f32,
            video_from_f32,
            video_tmp,
            blend_line,
            ..
        } = self;

        let ov_src: &Image = video_overlay.as_ref().unwrap_or(rgba_overlay);
        let vdesc = dst.desc();
        let (cxs, cys) = (vdesc.chroma_xs, vdesc.chroma_ys);

        for y in (0..*h).step_by(*align_y) {
            let line = slices.row(y);
            for (sx, s) in line.iter().enumerate() {
                if s.is_empty() {
                    continue;
                }
                let x = sx * SLICE_W + s.x0 as usize;
                let sw = (s.x1 - s.x0) as usize;

                assert!(x % *align_x == 0 && sw % *align_x == 0);
                assert!(x + sw <= *w);

                overlay_to_f32.line(overlay_tmp, ov_src, 0, 0, x, y, sw);
                video_to_f32.line(video_tmp, dst, 0, 0, x, y, sw);
                if let (Some(rp), Some(ct), Some(ca)) = (
                    calpha_to_f32.as_ref(),
                    calpha_tmp.as_mut(),
                    calpha_overlay.as_ref(),
                ) {
                    rp.line(ct, ca, 0, 0, x >> cxs, y >> cys, sw >> cxs);
                }

                blend_slice(
                    video_tmp,
                    overlay_tmp,
                    calpha_tmp.as_ref(),
                    sw,
                    *blend_line,
                );

                video_from_f32.line(dst, video_tmp, x, y, 0, 0, sw);
            }
        }

        Ok(())
    }
}

/// Blend one converted slice: per plane, `dst = ov + dst*(1 - a)` over
/// the rows of the current band, with the chroma-sized alpha feeding
/// subsampled planes.
fn blend_slice(
    vid: &mut Image,
    ov: &Image,
    calpha: Option<&Image>,
    w: usize,
    blend_line: BlendLineFn,
) {
    let vdesc = vid.desc();
    let odesc = ov.desc();
    let cys = vdesc.chroma_ys;

    for p in 0..vdesc.num_planes {
        let (xs, ys) = (vdesc.xs(p), vdesc.ys(p));
        let rows = (1usize << cys) - (1usize << ys) + 1;
        let cw = div_shift_up(w, xs);

        for y in 0..rows {
            let srow = ov.row_f32(p, y);
            let arow = if xs != 0 || ys != 0 {
                calpha.expect("subsampled planes need chroma alpha").row_f32(0, y)
            } else {
                ov.row_f32(odesc.num_planes - 1, y)
            };
            let drow = vid.row_f32_mut(p, y);
            blend_line(&mut drow[..cw], &srow[..cw], &arow[..cw]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osd::{AssPart, OverlayFormat};

    fn bgra_dst(w: usize, h: usize, px: [u8; 4]) -> Image {
        let mut img = Image::alloc(PixelFormat::Bgra8, w, h);
        img.set_alpha(AlphaMode::Premul);
        for y in 0..h {
            for x in 0..w {
                img.row_mut(0, y)[x * 4..x * 4 + 4].copy_from_slice(&px);
            }
        }
        img
    }

    fn full_ass_square(cov: &[u8], side: usize, color: u32) -> AssPart<'_> {
        AssPart {
            x: 0,
            y: 0,
            w: side,
            h: side,
            bitmap: cov,
            stride: side,
            color,
        }
    }

    #[test]
    fn unsupported_item_resets_cache() {
        let mut c = Compositor::new();
        let mut dst = bgra_dst(16, 16, [0, 0, 0, 255]);
        let items = [OverlayItem {
            render_index: 0,
            change_id: 1,
            parts: OverlayParts::Empty,
        }];
        let list = OverlayList {
            change_id: 1,
            w: 16,
            h: 16,
            items: &items,
        };
        assert_eq!(
            OverlayParts::Empty.format(),
            OverlayFormat::Empty
        );
        assert!(c.composite(&mut dst, &list).is_err());
        assert_eq!(c.debug_info(), "uninitialized");
    }

    #[test]
    fn pipeline_survives_identical_params() {
        let mut c = Compositor::new();
        let mut dst = bgra_dst(16, 16, [1, 2, 3, 255]);
        let list = OverlayList::empty(1, 16, 16);
        c.composite(&mut dst, &list).unwrap();
        let info1 = c.debug_info();
        c.composite(&mut dst, &list).unwrap();
        assert_eq!(info1, c.debug_info());
        assert!(!c.any_osd());
    }

    #[test]
    fn rgb_destination_skips_video_overlay() {
        let mut c = Compositor::new();
        let mut dst = bgra_dst(16, 16, [0, 0, 0, 255]);
        c.composite(&mut dst, &OverlayList::empty(1, 16, 16)).unwrap();
        let info = c.debug_info();
        assert!(info.contains("ov=-"), "{info}");
        assert!(info.contains("ov_f=gbrapf"), "{info}");
    }

    #[test]
    fn yuv420_picks_yuva_overlay_with_chroma_alpha() {
        let mut c = Compositor::new();
        let mut dst = Image::alloc(PixelFormat::Yuv420p8, 32, 32);
        dst.set_chroma_loc(ChromaLoc::Center);
        c.composite(&mut dst, &OverlayList::empty(1, 32, 32)).unwrap();
        let info = c.debug_info();
        assert!(info.contains("ov=yuva420p"), "{info}");
        assert!(info.contains("a=gray"), "{info}");
        assert!(info.contains("ca=gray"), "{info}");
        assert!(info.contains("ca_f=grayf"), "{info}");
    }

    #[test]
    fn ass_square_lands_in_yuv() {
        let mut c = Compositor::new();
        let mut dst = Image::alloc(PixelFormat::Yuv420p8, 32, 32);
        dst.set_chroma_loc(ChromaLoc::Center);
        // Limited-range mid grey.
        for p in 0..3 {
            for y in 0..dst.plane_h(p) {
                dst.row_mut(p, y).fill(if p == 0 { 126 } else { 128 });
            }
        }

        let cov = vec![255u8; 16 * 16];
        let parts = [AssPart {
            x: 8,
            y: 8,
            w: 16,
            h: 16,
            bitmap: &cov,
            stride: 16,
            color: 0xFFFF_FF00, // opaque white
        }];
        let items = [OverlayItem {
            render_index: 0,
            change_id: 1,
            parts: OverlayParts::Ass(&parts),
        }];
        let list = OverlayList {
            change_id: 1,
            w: 32,
            h: 32,
            items: &items,
        };
        c.composite(&mut dst, &list).unwrap();

        // Inside: limited white, neutral chroma. Outside: untouched.
        for (x, y) in [(8, 8), (15, 12), (23, 23)] {
            let yv = dst.row(0, y)[x] as i32;
            assert!((yv - 235).abs() <= 1, "y at ({x},{y}) = {yv}");
        }
        let u = dst.row(1, 6)[6] as i32;
        let v = dst.row(2, 6)[6] as i32;
        assert!((u - 128).abs() <= 1 && (v - 128).abs() <= 1);
        assert_eq!(dst.row(0, 0)[0], 126);
        assert_eq!(dst.row(1, 0)[0], 128);
        assert_eq!(dst.row(0, 31)[31], 126);
    }

    #[test]
    fn tiled_and_whole_conversion_agree_for_center_siting() {
        let cov = vec![200u8; 8 * 8];
        let parts = [full_ass_square(&cov, 8, 0x80FF_4020)];
        let items = [OverlayItem {
            render_index: 0,
            change_id: 7,
            parts: OverlayParts::Ass(&parts),
        }];
        let list = OverlayList {
            change_id: 7,
            w: 32,
            h: 32,
            items: &items,
        };

        let run = |tiles: bool| -> Vec<u8> {
            let mut c = Compositor::with_options(ComposeOptions {
                scale_in_tiles: tiles,
            });
            let mut dst = Image::alloc(PixelFormat::Yuv420p8, 32, 32);
            dst.set_chroma_loc(ChromaLoc::Center);
            dst.clear_rect(0, 0, 32, 32);
            c.composite(&mut dst, &list).unwrap();
            let mut out = Vec::new();
            for p in 0..3 {
                for y in 0..dst.plane_h(p) {
                    out.extend_from_slice(&dst.row(p, y)[..dst.plane_w(p)]);
                }
            }
            out
        };

        assert_eq!(run(true), run(false));
    }

    #[test]
    fn tiled_conversion_skips_clean_tiles() {
        let cov = vec![255u8; 4 * 4];
        let parts = [full_ass_square(&cov, 4, 0xFFFF_FF00)];
        let items = [OverlayItem {
            render_index: 0,
            change_id: 1,
            parts: OverlayParts::Ass(&parts),
        }];
        // Tall destination: many tile rows, only the first is dirty.
        let list = OverlayList {
            change_id: 1,
            w: 64,
            h: 64,
            items: &items,
        };
        let mut c = Compositor::new();
        let mut dst = Image::alloc(PixelFormat::Yuv420p8, 64, 64);
        dst.set_chroma_loc(ChromaLoc::Center);
        dst.clear_rect(0, 0, 64, 64);
        c.composite(&mut dst, &list).unwrap();

        // One dirty tile: one overlay conversion + one alpha downsample.
        assert_eq!(c.stats().scale_calls, 2);
    }

    #[test]
    fn second_composite_with_same_change_id_does_no_scaling() {
        let bitmap = vec![255u8; 8 * 8 * 4];
        let parts = [BgraPart {
            x: 0,
            y: 0,
            w: 8,
            h: 8,
            dw: 16,
            dh: 16,
            bitmap: &bitmap,
            stride: 8 * 4,
        }];
        let items = [OverlayItem {
            render_index: 0,
            change_id: 3,
            parts: OverlayParts::Bgra(&parts),
        }];
        let list = OverlayList {
            change_id: 3,
            w: 32,
            h: 32,
            items: &items,
        };

        let mut c = Compositor::new();
        let mut dst = Image::alloc(PixelFormat::Yuv420p8, 32, 32);
        dst.set_chroma_loc(ChromaLoc::Center);
        dst.clear_rect(0, 0, 32, 32);

        c.composite(&mut dst, &list).unwrap();
        let first = c.stats().scale_calls;
        assert!(first >= 1);

        let mut dst2 = Image::alloc(PixelFormat::Yuv420p8, 32, 32);
        dst2.set_chroma_loc(ChromaLoc::Center);
        dst2.clear_rect(0, 0, 32, 32);
        c.composite(&mut dst2, &list).unwrap();
        assert_eq!(c.stats().scale_calls, first);
    }

    #[test]
    fn param_change_rebuilds_pipeline() {
        let mut c = Compositor::new();
        let mut a = bgra_dst(16, 16, [0, 0, 0, 255]);
        c.composite(&mut a, &OverlayList::empty(1, 16, 16)).unwrap();
        let rgb_info = c.debug_info();

        let mut b = Image::alloc(PixelFormat::Yuv420p8, 32, 32);
        b.set_chroma_loc(ChromaLoc::Center);
        c.composite(&mut b, &OverlayList::empty(2, 32, 32)).unwrap();
        assert_ne!(c.debug_info(), rgb_info);
    }
}
