// Demo runner for the `hsb_render` library.
//
// Builds a synthetic three-channel volume in memory, binds each channel to a
// primary color, adds a checkerboard overlay, and renders an XY and an XZ plane.
// An optional first argument names a JSON `CompositorConfig`.

use anyhow::{Context, Result};
use log::info;
use std::path::Path;
use std::sync::Arc;

use hsb_render::{
    ChannelBinding, CodomainChain, CodomainMap, Compositor, CompositorConfig, Family, InMemoryPixelSource,
    OutputBuffer, Overlay, PixelType, PixelsMeta, PlaneDef, Rgba, TimingStats, plane_dims_as_string,
};

const SIZE_X: usize = 256;
const SIZE_Y: usize = 192;
const SIZE_Z: usize = 8;
const SIZE_C: usize = 3;

/// Uint16 samples, big-endian, XYZCT order. Each channel is a different ramp.
fn synthetic_volume() -> Vec<u8> {
    let mut data = Vec::with_capacity(SIZE_X * SIZE_Y * SIZE_Z * SIZE_C * 2);
    for c in 0..SIZE_C {
        for z in 0..SIZE_Z {
            for y in 0..SIZE_Y {
                for x in 0..SIZE_X {
                    let value = match c {
                        0 => x * 16,
                        1 => y * 20,
                        _ => (x + y + z * 32) * 8,
                    };
                    data.extend_from_slice(&(value as u16).to_be_bytes());
                }
            }
        }
    }
    data
}

/// One bit per output pixel, set on 16x16 checkerboard squares.
fn checkerboard(size_x1: usize, size_x2: usize) -> Vec<u8> {
    let mut mask = vec![0u8; (size_x1 * size_x2).div_ceil(8)];
    for x2 in 0..size_x2 {
        for x1 in 0..size_x1 {
            if (x1 / 16 + x2 / 16) % 2 == 0 {
                let i = x2 * size_x1 + x1;
                mask[i / 8] |= 0x80 >> (i % 8);
            }
        }
    }
    mask
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => CompositorConfig::load(Path::new(&path)).with_context(|| format!("loading {}", path))?,
        None => CompositorConfig::default(),
    };
    info!("hsb_render demo, up to {} tasks per render", config.max_tasks);
    let compositor = Compositor::new(config)?;

    let meta = PixelsMeta::new(SIZE_X, SIZE_Y, SIZE_Z, SIZE_C, 1, PixelType::Uint16);
    let source = Arc::new(InMemoryPixelSource::new(meta.clone(), synthetic_volume())?);
    let stats = Arc::new(TimingStats::new());

    let xy = PlaneDef::xy(SIZE_Z / 2, 0);
    let mut ctx = compositor
        .new_context(meta.clone(), source)
        .with_bindings(vec![
            ChannelBinding::new(Rgba::RED, 0.0, 4095.0),
            ChannelBinding::new(Rgba::GREEN, 0.0, 3840.0).with_family(Family::Polynomial, 2.0),
            ChannelBinding::new(Rgba::BLUE, 100.0, 4000.0)
                .with_family(Family::Logarithmic, 1.0)
                .with_noise_reduction(true),
        ])?
        .with_stats(stats.clone())
        .with_overlay(Overlay::new(checkerboard(SIZE_X, SIZE_Y), 0xFF_FF_00_40));

    let rgb = compositor.render(&ctx, &xy).context("rendering the XY plane")?;
    info!(
        "XY plane {} rendered, {} bytes of RGB, centre pixel {:?}",
        plane_dims_as_string(&xy, &meta)?,
        rgb.image_size(),
        rgb.rgb_at((SIZE_Y / 2) * SIZE_X + SIZE_X / 2)
    );

    let argb = compositor.render_as_packed_int(&ctx, &xy)?;
    info!("first packed ARGB pixel {:#010x}", argb.packed(0) as u32);

    ctx.clear_overlays();
    let ctx = ctx.with_codomain_chain(
        CodomainChain::identity()
            .with(CodomainMap::ContrastStretching {
                x_start: 32,
                y_start: 0,
                x_end: 224,
                y_end: 255,
            })?
            .with(CodomainMap::ReverseIntensity)?,
    );
    let xz = PlaneDef::xz(SIZE_Y / 3, 0);
    let rgba = compositor.render_as_packed_int_as_rgba(&ctx, &xz)?;
    info!(
        "XZ plane {} rendered with an inverted stretch, first pixel {:#010x}",
        plane_dims_as_string(&xz, &meta)?,
        rgba.packed(0) as u32
    );

    if let Some(elapsed) = stats.rendering_time() {
        info!("{} renders, last one took {:?}", stats.renders(), elapsed);
    }
    Ok(())
}
