// THEORY:
// The compositor turns a rendering context and a plane definition into an RGB
// image. It sums the active channels and overlays of the plane, each quantized
// and tinted in its own color. It is a single pipeline with three entry points,
// one per output buffer shape; the shape is a type parameter and nothing else
// differs between them.
//
// One call walks a fixed sequence of states:
//
//   Init -> Sized -> BufferReady -> TasksBuilt -> Running -> Complete | Failed
//
// Key architectural principles:
// 1.  **Per-Call State**: Output sizes, layers and the partition are computed at
//     the top of every call and never stored on the compositor. A compositor can
//     be shared freely; only the context must stay untouched during a call.
// 2.  **Exact Row Strips**: The output is cut into T strips of equal height, where
//     T is the largest count up to `max_tasks` that divides the height. The
//     strips are a disjoint cover of the image, so tasks never touch the same
//     pixel and the inner loop needs no ragged-edge branch.
// 3.  **Scoped Source**: The pixel source is opened before any plane is read and
//     closed on every exit path, after every task has finished.
// 4.  **All Or Nothing**: Every task is awaited. The first failure in task order
//     is returned and no partial image ever reaches the caller.

use log::{debug, error, trace, warn};
use std::sync::Arc;

use crate::config::CompositorConfig;
use crate::core_modules::context::RenderingContext;
use crate::core_modules::output_buffer::{ByteRgbBuffer, IntArgbBuffer, IntRgbaBuffer, OutputBuffer};
use crate::core_modules::pixel_source::{PixelSource, PixelSourceGuard};
use crate::core_modules::pixels::PixelsMeta;
use crate::core_modules::plane::{Plane2D, PlaneFactory};
use crate::core_modules::plane_def::{PlaneDef, PlaneGeometry};
use crate::core_modules::quantum::BinaryMaskQuantizer;
use crate::core_modules::region_task::{Layer, RegionBounds, RegionTask};
use crate::core_modules::worker_pool::{WorkerPool, run_inline};
use crate::error::{RenderError, RenderResult};

/// Lifecycle of a single render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderState {
    Init,
    Sized,
    BufferReady,
    TasksBuilt,
    Running,
    Complete,
    Failed,
}

struct StateTrace(RenderState);

impl StateTrace {
    fn advance(&mut self, next: RenderState) {
        trace!("render {:?} -> {:?}", self.0, next);
        self.0 = next;
    }
}

// --- Sizing & partitioning ---

/// Bytes of RGB output a render of `def` produces; alpha is never counted.
pub fn image_size(def: &PlaneDef, meta: &PixelsMeta) -> RenderResult<usize> {
    Ok(PlaneGeometry::new(def, meta)?.pixel_count() * 3)
}

/// Output dimensions of a render of `def`, as `"{size_x1}x{size_x2}"`.
pub fn plane_dims_as_string(def: &PlaneDef, meta: &PixelsMeta) -> RenderResult<String> {
    let geometry = PlaneGeometry::new(def, meta)?;
    Ok(format!("{}x{}", geometry.size_x1, geometry.size_x2))
}

/// The largest task count in `[1, max_tasks]` that divides `size_x2` exactly.
pub fn num_tasks(size_x2: usize, max_tasks: usize) -> usize {
    if size_x2 == 0 {
        return 1;
    }
    (1..=max_tasks.clamp(1, size_x2))
        .rev()
        .find(|t| size_x2 % t == 0)
        .unwrap_or(1)
}

/// Cuts a `size_x1 x size_x2` image into equal full-width row strips.
pub fn partition(size_x1: usize, size_x2: usize, max_tasks: usize) -> Vec<RegionBounds> {
    let tasks = num_tasks(size_x2, max_tasks);
    let delta = size_x2 / tasks;
    (0..tasks)
        .map(|i| RegionBounds {
            x1_start: 0,
            x1_end: size_x1,
            x2_start: i * delta,
            x2_end: (i + 1) * delta,
        })
        .collect()
}

// --- Compositor ---

/// Renders planes of a multi-channel volume into RGB images.
pub struct Compositor {
    config: CompositorConfig,
    /// Long-lived pool supplied by the caller; `None` spins one up per call.
    pool: Option<Arc<WorkerPool>>,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> RenderResult<Self> {
        config.validate()?;
        Ok(Self { config, pool: None })
    }

    /// Runs region tasks on `pool` instead of a pool local to each call.
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// A fresh context carrying this compositor's default optimizations.
    pub fn new_context(&self, metadata: PixelsMeta, pixels: Arc<dyn PixelSource>) -> RenderingContext {
        RenderingContext::new(metadata, pixels).with_optimizations(self.config.optimizations)
    }

    /// Renders into three parallel byte planes.
    pub fn render(&self, ctx: &RenderingContext, def: &PlaneDef) -> RenderResult<ByteRgbBuffer> {
        self.render_into(ctx, def)
    }

    /// Renders into one `0xFF_RR_GG_BB` integer per pixel.
    pub fn render_as_packed_int(&self, ctx: &RenderingContext, def: &PlaneDef) -> RenderResult<IntArgbBuffer> {
        self.render_into(ctx, def)
    }

    /// Renders into one `0xRR_GG_BB_FF` integer per pixel.
    pub fn render_as_packed_int_as_rgba(
        &self,
        ctx: &RenderingContext,
        def: &PlaneDef,
    ) -> RenderResult<IntRgbaBuffer> {
        self.render_into(ctx, def)
    }

    fn render_into<B: OutputBuffer>(&self, ctx: &RenderingContext, def: &PlaneDef) -> RenderResult<B> {
        let mut state = StateTrace(RenderState::Init);
        let result = self.run_pipeline(ctx, def, &mut state);
        match &result {
            Ok(_) => state.advance(RenderState::Complete),
            Err(e) => {
                debug!("render of {:?} failed: {}", def, e);
                state.advance(RenderState::Failed);
            }
        }
        result
    }

    fn run_pipeline<B: OutputBuffer>(
        &self,
        ctx: &RenderingContext,
        def: &PlaneDef,
        state: &mut StateTrace,
    ) -> RenderResult<B> {
        let geometry = PlaneGeometry::new(def, ctx.metadata())?;
        state.advance(RenderState::Sized);

        let buffer = B::zeroed(geometry.size_x1, geometry.size_x2);
        state.advance(RenderState::BufferReady);
        if geometry.pixel_count() == 0 {
            debug!("plane {:?} has an empty output, nothing to composite", def);
            return Ok(buffer);
        }

        let guard = PixelSourceGuard::acquire(ctx.pixels.as_ref())?;
        let layers: Arc<[Layer]> = gather_layers(ctx, def, &geometry, guard.source())?.into();

        let bounds = partition(geometry.size_x1, geometry.size_x2, self.config.max_tasks);
        let delta = bounds.first().map_or(geometry.size_x2, RegionBounds::rows);
        if bounds.len() == 1 && self.config.max_tasks > 1 && geometry.size_x2 > 1 {
            debug!(
                "no task count in 2..={} divides {} rows; rendering on the calling thread",
                self.config.max_tasks, geometry.size_x2
            );
        }

        let strips = buffer.split_rows(delta);
        if strips.len() != bounds.len() {
            return Err(RenderError::InternalError(format!(
                "{} output strips for {} region tasks",
                strips.len(),
                bounds.len()
            )));
        }
        let tasks: Vec<RegionTask<B>> = strips
            .into_iter()
            .zip(bounds)
            .map(|(strip, region)| {
                RegionTask::new(
                    strip,
                    Arc::clone(&layers),
                    Arc::clone(&ctx.codomain_chain),
                    ctx.optimizations,
                    region,
                )
            })
            .collect();
        state.advance(RenderState::TasksBuilt);
        debug!(
            "compositing {} layers into {}x{} over {} tasks",
            layers.len(),
            geometry.size_x1,
            geometry.size_x2,
            tasks.len()
        );

        ctx.stats.start_rendering();
        state.advance(RenderState::Running);
        let results = self.dispatch(tasks);
        ctx.stats.end_rendering();

        // On failure the guard is dropped here, closing the source.
        let strips = first_failure(results?)?;
        guard.release()?;
        Ok(B::join_rows(strips))
    }

    /// Runs task 0 on the calling thread and the rest on the worker pool.
    fn dispatch<B: OutputBuffer>(&self, tasks: Vec<RegionTask<B>>) -> RenderResult<Vec<RenderResult<B>>> {
        if tasks.len() == 1 && self.pool.is_none() {
            return Ok(tasks.into_iter().map(|task| run_inline(|| task.run())).collect());
        }

        let jobs: Vec<_> = tasks.into_iter().map(|task| move || task.run()).collect();
        match &self.pool {
            Some(pool) => Ok(pool.run(jobs)),
            None => {
                let pool = WorkerPool::new(jobs.len() - 1)?;
                let results = pool.run(jobs);
                pool.shutdown();
                Ok(results)
            }
        }
    }
}

/// Builds the layer list: active channels in ascending order, then overlays.
fn gather_layers(
    ctx: &RenderingContext,
    def: &PlaneDef,
    geometry: &PlaneGeometry,
    source: &dyn PixelSource,
) -> RenderResult<Vec<Layer>> {
    let mut layers = Vec::with_capacity(ctx.layer_count());

    for (channel, binding) in ctx.channel_bindings().iter().enumerate() {
        if !binding.active {
            continue;
        }
        ctx.stats.start_io(channel);
        let plane = PlaneFactory::create_plane(def, channel, ctx.metadata(), source);
        ctx.stats.end_io(channel);
        let strategy = ctx.quantum_manager().strategy_for(channel)?;
        layers.push(Layer::new(channel, plane?, strategy, binding.color));
    }

    let first_overlay = ctx.metadata().size_c;
    for (i, overlay) in ctx.overlays().iter().enumerate() {
        let plane = Plane2D::from_mask(*geometry, Arc::clone(&overlay.mask));
        layers.push(Layer::new(
            first_overlay + i,
            plane,
            Arc::new(BinaryMaskQuantizer),
            overlay.rgba(),
        ));
    }

    trace!(
        "gathered {} layers ({} overlays)",
        layers.len(),
        ctx.overlays().len()
    );
    Ok(layers)
}

/// Keeps the strips if every task succeeded, otherwise the first error in task order.
fn first_failure<B>(results: Vec<RenderResult<B>>) -> RenderResult<Vec<B>> {
    let mut strips = Vec::with_capacity(results.len());
    let mut first = None;
    for (task, result) in results.into_iter().enumerate() {
        match result {
            Ok(strip) => strips.push(strip),
            Err(e) if first.is_none() => {
                error!("region task {} failed: {}", task, e);
                first = Some(e);
            }
            Err(e) => warn!("region task {} also failed: {}", task, e),
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(strips),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::channel::{ChannelBinding, Rgba};
    use crate::core_modules::pixel_source::InMemoryPixelSource;
    use crate::core_modules::pixels::PixelType;
    use crate::core_modules::plane_def::{Region, Slice};
    use crate::core_modules::stats::TimingStats;
    use proptest::prelude::*;

    fn compositor(max_tasks: usize) -> Compositor {
        Compositor::new(CompositorConfig {
            max_tasks,
            ..CompositorConfig::default()
        })
        .unwrap()
    }

    /// One Uint8 channel whose sample at (x, y) is `x * 16 + y`.
    fn gradient(size_x: usize, size_y: usize) -> (PixelsMeta, Arc<InMemoryPixelSource>) {
        let meta = PixelsMeta::new(size_x, size_y, 1, 1, 1, PixelType::Uint8);
        let data = (0..size_y)
            .flat_map(|y| (0..size_x).map(move |x| (x * 16 + y) as u8))
            .collect();
        let source = InMemoryPixelSource::new(meta.clone(), data).unwrap();
        (meta, Arc::new(source))
    }

    #[test]
    fn task_count_is_the_largest_divisor() {
        assert_eq!(num_tasks(1000, 8), 8);
        assert_eq!(num_tasks(999, 8), 3);
        assert_eq!(num_tasks(997, 8), 1);
        assert_eq!(num_tasks(6, 100), 6);
        assert_eq!(num_tasks(0, 8), 1);
        assert_eq!(num_tasks(10, 0), 1);
    }

    #[test]
    fn sizes_follow_the_slice() {
        let meta = PixelsMeta::new(8, 6, 4, 1, 1, PixelType::Uint8);
        assert_eq!(image_size(&PlaneDef::xy(0, 0), &meta).unwrap(), 8 * 6 * 3);
        assert_eq!(plane_dims_as_string(&PlaneDef::xz(0, 0), &meta).unwrap(), "8x4");
        assert_eq!(plane_dims_as_string(&PlaneDef::zy(0, 0), &meta).unwrap(), "4x6");
        let cropped = PlaneDef::new(Slice::XY, 0, 0).with_region(Region::new(2, 2, 5, 3));
        assert_eq!(plane_dims_as_string(&cropped, &meta).unwrap(), "5x3");
        assert!(matches!(
            PlaneDef::from_slice_id(7, 0, 0),
            Err(RenderError::InvalidSlice(7))
        ));
    }

    #[test]
    fn renders_a_single_red_channel() {
        let (meta, source) = gradient(4, 6);
        let stats = Arc::new(TimingStats::new());
        let ctx = compositor(3)
            .new_context(meta, source.clone())
            .with_bindings(vec![ChannelBinding::new(Rgba::RED, 0.0, 255.0)])
            .unwrap()
            .with_stats(stats.clone());
        let out = compositor(3).render(&ctx, &PlaneDef::xy(0, 0)).unwrap();
        for y in 0..6 {
            for x in 0..4 {
                assert_eq!(out.rgb_at(y * 4 + x), ((x * 16 + y) as u8, 0, 0));
            }
        }
        assert!(!source.is_open());
        assert_eq!(source.close_count(), 1);
        assert_eq!(stats.renders(), 1);
        assert!(stats.io_time(0).is_some());
    }

    #[test]
    fn shared_pool_gives_the_same_image() {
        let (meta, source) = gradient(5, 8);
        let pool = Arc::new(WorkerPool::new(4).unwrap());
        let ctx = RenderingContext::new(meta, source)
            .with_bindings(vec![ChannelBinding::new(Rgba::new(10, 200, 90, 255), 0.0, 255.0)])
            .unwrap();
        let local = compositor(4).render_as_packed_int(&ctx, &PlaneDef::xy(0, 0)).unwrap();
        let shared = compositor(4)
            .with_pool(Arc::clone(&pool))
            .render_as_packed_int(&ctx, &PlaneDef::xy(0, 0))
            .unwrap();
        assert_eq!(local, shared);
    }

    #[test]
    fn failed_render_still_closes_the_source() {
        let (meta, source) = gradient(2, 2);
        let mut ctx = RenderingContext::new(meta, source.clone())
            .with_bindings(vec![ChannelBinding::new(Rgba::RED, 0.0, 255.0)])
            .unwrap();
        // Mask too short for a 2x2 output.
        ctx = ctx.with_overlay(crate::core_modules::channel::Overlay::new(Vec::new(), 0xFF0000FF));
        let err = compositor(2).render(&ctx, &PlaneDef::xy(0, 0)).unwrap_err();
        assert!(matches!(err, RenderError::InvalidCoordinate { .. }));
        assert!(!source.is_open());
        assert_eq!(source.open_count(), 1);
    }

    #[test]
    fn empty_output_skips_the_source() {
        let (meta, source) = gradient(3, 3);
        let ctx = RenderingContext::new(meta, source.clone());
        let def = PlaneDef::xy(0, 0).with_region(Region::new(1, 1, 0, 2));
        let out = compositor(4).render(&ctx, &def).unwrap();
        assert_eq!(out.pixel_count(), 0);
        assert_eq!(source.open_count(), 0);
    }

    proptest! {
        #[test]
        fn partition_is_a_disjoint_cover(size_x1 in 0usize..40, size_x2 in 0usize..200, max_tasks in 1usize..32) {
            let bounds = partition(size_x1, size_x2, max_tasks);
            let tasks = bounds.len();
            prop_assert!(tasks >= 1 && tasks <= max_tasks.max(1));
            if size_x2 > 0 {
                prop_assert_eq!(size_x2 % tasks, 0);
            }
            let mut next_row = 0;
            for b in &bounds {
                prop_assert_eq!(b.x1_start, 0);
                prop_assert_eq!(b.x1_end, size_x1);
                prop_assert_eq!(b.x2_start, next_row);
                prop_assert_eq!(b.rows(), size_x2 / tasks);
                next_row = b.x2_end;
            }
            prop_assert_eq!(next_row, size_x2);
        }

        #[test]
        fn larger_divisors_are_never_skipped(size_x2 in 1usize..500, max_tasks in 1usize..16) {
            let chosen = num_tasks(size_x2, max_tasks);
            prop_assert!((chosen + 1..=max_tasks).all(|t| size_x2 % t != 0));
        }
    }
}
