//! Repack conformance: pack/unpack symmetry per format, known
//! conversion pairs, and float round-trips over every storable value.

use osdcompose::{ComponentType, Image, Levels, PixelFormat, Repack, RepackDir};

fn uint_formats() -> Vec<PixelFormat> {
    PixelFormat::ALL
        .into_iter()
        .filter(|f| f.desc().component_type == ComponentType::Uint)
        .collect()
}

#[test]
fn pack_and_unpack_are_symmetric() {
    for fmt in uint_formats() {
        let un = Repack::new_planar(fmt, RepackDir::ToFloat).unwrap();
        let pa = Repack::new_planar(fmt, RepackDir::FromFloat).unwrap();

        assert_eq!(un.src_format(), pa.dst_format());
        assert_eq!(un.dst_format(), pa.src_format());
        assert_eq!(un.align_x(), pa.align_x());
        assert_eq!(un.align_y(), pa.align_y());
        assert!(un.align_x() <= 2 && un.align_y() <= 2, "{}", fmt.name());
    }
}

#[test]
fn known_packed_expansion() {
    // BGRA byte order feeds the G,B,R,A float planes.
    let rp = Repack::new_planar(PixelFormat::Bgra8, RepackDir::ToFloat).unwrap();
    let mut src = Image::alloc(PixelFormat::Bgra8, 1, 1);
    src.row_mut(0, 0)[..4].copy_from_slice(&[1, 2, 3, 4]);
    let mut dst = Image::alloc(PixelFormat::Gbrapf32, 1, 1);
    rp.line(&mut dst, &src, 0, 0, 0, 0, 1);

    let got: Vec<f32> = (0..4).map(|p| dst.row_f32(p, 0)[0]).collect();
    let want: Vec<f32> = [2u8, 1, 3, 4].iter().map(|&v| v as f32 / 255.0).collect();
    assert_eq!(got, want);
}

#[test]
fn padded_packed_format_skips_the_pad_byte() {
    let rp = Repack::new_planar(PixelFormat::Bgrx8, RepackDir::FromFloat).unwrap();
    assert_eq!(rp.src_format(), PixelFormat::Gbrpf32);

    let mut f = Image::alloc(PixelFormat::Gbrpf32, 1, 1);
    f.row_f32_mut(0, 0)[0] = 1.0;
    f.row_f32_mut(1, 0)[0] = 0.0;
    f.row_f32_mut(2, 0)[0] = 1.0;

    let mut dst = Image::alloc(PixelFormat::Bgrx8, 1, 1);
    dst.row_mut(0, 0)[3] = 0x5A;
    rp.line(&mut dst, &f, 0, 0, 0, 0, 1);

    assert_eq!(&dst.row(0, 0)[..4], &[0, 255, 255, 0x5A]);
}

#[test]
fn float_roundtrip_every_value_every_uint_format() {
    for fmt in uint_formats() {
        let desc = fmt.desc();
        let n = (desc.max_value() + 1) as usize;
        // Two macropixel rows so subsampled planes get real data.
        let w = n.max(4);
        let to = Repack::new_planar(fmt, RepackDir::ToFloat).unwrap();
        let from = Repack::new_planar(fmt, RepackDir::FromFloat).unwrap();

        for levels in [Levels::Limited, Levels::Full] {
            let mut src = Image::alloc(fmt, w, 2);
            let mut color = src.params().color;
            color.levels = levels;
            src.set_color(color);

            for p in 0..desc.num_planes {
                let pw = src.plane_w(p);
                let plane = desc.planes[p];
                for y in 0..src.plane_h(p) {
                    match desc.component_size {
                        1 => {
                            let bpp = desc.bytes_per_pixel(p);
                            let row = src.row_mut(p, y);
                            for x in 0..pw {
                                for i in 0..bpp {
                                    // Padding bytes stay zero; the
                                    // packer never writes them.
                                    row[x * bpp + i] = if plane.components[i] == 0 {
                                        0
                                    } else {
                                        ((x * bpp + i) % n) as u8
                                    };
                                }
                            }
                        }
                        2 => {
                            let row = src.row_mut(p, y);
                            for x in 0..pw {
                                let v = (x % n) as u16;
                                row[x * 2..x * 2 + 2].copy_from_slice(&v.to_ne_bytes());
                            }
                        }
                        _ => unreachable!(),
                    }
                }
            }

            let mut f = Image::alloc(fmt.float_companion(), w, 2);
            let mut back = Image::alloc(fmt, w, 2);
            back.set_color(color);

            for x in (0..w).step_by(to.align_x()) {
                // Convert band by band like the blender does.
                let sw = to.align_x();
                for y in (0..2).step_by(to.align_y()) {
                    to.line(&mut f, &src, x, y, x, y, sw);
                    from.line(&mut back, &f, x, y, x, y, sw);
                }
            }

            for p in 0..desc.num_planes {
                let pw = src.plane_w(p) * desc.bytes_per_pixel(p);
                for y in 0..src.plane_h(p) {
                    assert_eq!(
                        &src.row(p, y)[..pw],
                        &back.row(p, y)[..pw],
                        "{} {:?} plane {p} row {y}",
                        fmt.name(),
                        levels,
                    );
                }
            }
        }
    }
}

#[test]
fn float_values_match_closed_form() {
    // Spot-check the normalization anchors the blender relies on.
    let rp = Repack::new_planar(PixelFormat::Yuva444p8, RepackDir::ToFloat).unwrap();
    let mut src = Image::alloc(PixelFormat::Yuva444p8, 4, 1);
    src.row_mut(0, 0)[..4].copy_from_slice(&[16, 235, 126, 0]);
    src.row_mut(1, 0)[..4].copy_from_slice(&[16, 128, 240, 128]);
    src.row_mut(2, 0)[..4].copy_from_slice(&[128, 128, 128, 128]);
    src.row_mut(3, 0)[..4].copy_from_slice(&[0, 128, 255, 255]);

    let mut f = Image::alloc(PixelFormat::Yuva444pf32, 4, 1);
    rp.line(&mut f, &src, 0, 0, 0, 0, 4);

    let y = f.row_f32(0, 0);
    assert!(y[0].abs() < 1e-6);
    assert!((y[1] - 1.0).abs() < 1e-6);
    assert!((y[2] - 110.0 / 219.0).abs() < 1e-6);
    assert!((y[3] + 16.0 / 219.0).abs() < 1e-6);

    let u = f.row_f32(1, 0);
    assert!((u[0] + 0.5).abs() < 1e-6);
    assert!(u[1].abs() < 1e-6);
    assert!((u[2] - 0.5).abs() < 1e-6);

    let a = f.row_f32(3, 0);
    assert!(a[0].abs() < 1e-6);
    assert!((a[1] - 128.0 / 255.0).abs() < 1e-6);
    assert!((a[2] - 1.0).abs() < 1e-6);
}
