// THEORY:
// `RenderingContext` is everything one render call needs, gathered in one place:
// the channel bindings, the overlays, the pixel source, the volume metadata, the
// per-channel quantum strategies, the codomain chain, the optimization flags and
// the stats sink. The compositor only ever borrows it immutably, which is what
// makes a render see a frozen snapshot. Concurrent renders on the same context are
// fine as long as nobody mutates it in between; mutation needs `&mut` and so is
// serialized by the borrow checker.

use std::sync::Arc;

use crate::config::Optimizations;
use crate::core_modules::channel::{ChannelBinding, Overlay};
use crate::core_modules::codomain::CodomainChain;
use crate::core_modules::pixel_source::PixelSource;
use crate::core_modules::pixels::PixelsMeta;
use crate::core_modules::quantum::{QuantumDef, QuantumManager};
use crate::core_modules::stats::{NoStats, RenderingStats};
use crate::error::{RenderError, RenderResult};

/// A snapshot of the display state of one pixels set.
pub struct RenderingContext {
    pub(crate) channel_bindings: Vec<ChannelBinding>,
    pub(crate) overlays: Vec<Overlay>,
    pub(crate) pixels: Arc<dyn PixelSource>,
    pub(crate) metadata: PixelsMeta,
    pub(crate) quantum_manager: QuantumManager,
    pub(crate) codomain_chain: Arc<CodomainChain>,
    pub(crate) optimizations: Optimizations,
    pub(crate) stats: Arc<dyn RenderingStats>,
}

impl RenderingContext {
    /// A context with no channels bound, no overlays and the identity codomain chain.
    pub fn new(metadata: PixelsMeta, pixels: Arc<dyn PixelSource>) -> Self {
        let quantum_manager = QuantumManager::new(&metadata, QuantumDef::default());
        Self {
            channel_bindings: Vec::new(),
            overlays: Vec::new(),
            pixels,
            metadata,
            quantum_manager,
            codomain_chain: Arc::new(CodomainChain::identity()),
            optimizations: Optimizations::default(),
            stats: Arc::new(NoStats),
        }
    }

    /// Replaces the codomain settings; strategies are rebuilt for the current bindings.
    pub fn with_quantum_def(mut self, def: QuantumDef) -> RenderResult<Self> {
        self.quantum_manager = QuantumManager::new(&self.metadata, def);
        self.quantum_manager.init_strategies(&self.channel_bindings)?;
        Ok(self)
    }

    /// Binds channels in index order and builds their quantum strategies.
    pub fn with_bindings(mut self, bindings: Vec<ChannelBinding>) -> RenderResult<Self> {
        self.set_bindings(bindings)?;
        Ok(self)
    }

    pub fn set_bindings(&mut self, bindings: Vec<ChannelBinding>) -> RenderResult<()> {
        if bindings.len() > self.metadata.size_c {
            return Err(RenderError::Config(format!(
                "{} channel bindings for a volume with {} channels",
                bindings.len(),
                self.metadata.size_c
            )));
        }
        self.quantum_manager.init_strategies(&bindings)?;
        self.channel_bindings = bindings;
        Ok(())
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlays.push(overlay);
        self
    }

    pub fn with_codomain_chain(mut self, chain: CodomainChain) -> Self {
        self.codomain_chain = Arc::new(chain);
        self
    }

    pub fn with_optimizations(mut self, optimizations: Optimizations) -> Self {
        self.optimizations = optimizations;
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn RenderingStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn channel_bindings(&self) -> &[ChannelBinding] {
        &self.channel_bindings
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn clear_overlays(&mut self) {
        self.overlays.clear();
    }

    pub fn metadata(&self) -> &PixelsMeta {
        &self.metadata
    }

    pub fn quantum_manager(&self) -> &QuantumManager {
        &self.quantum_manager
    }

    /// Mutable access, e.g. to install a custom strategy for one channel.
    pub fn quantum_manager_mut(&mut self) -> &mut QuantumManager {
        &mut self.quantum_manager
    }

    pub fn codomain_chain(&self) -> &CodomainChain {
        &self.codomain_chain
    }

    pub fn optimizations(&self) -> Optimizations {
        self.optimizations
    }

    /// Number of layers a render will composite: active channels plus overlays.
    pub fn layer_count(&self) -> usize {
        self.channel_bindings.iter().filter(|b| b.active).count() + self.overlays.len()
    }
}
