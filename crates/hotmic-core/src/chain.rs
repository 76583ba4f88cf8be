//! Per-channel plugin chains.
//!
//! A [`PluginChain`] is an ordered sequence of [`PluginSlot`]s, each held
//! behind its own `Arc`. Mutation (insert/remove/reorder/replace) happens
//! on a UI thread and constructs a brand-new `Arc<Vec<Arc<PluginSlot>>>`,
//! published via a single [`arc_swap::ArcSwap`] store so the audio thread
//! only ever needs one atomic pointer load per block — never a lock, never
//! a clone of the whole chain. Slots untouched by a given mutation are
//! carried into the new list by cloning their `Arc` rather than rebuilt,
//! so reordering or inserting a neighbor never disturbs a plugin's live
//! state. Retired slots stay alive until every holder (including any
//! in-flight audio block) drops its `Arc`.
//!
//! A published chain is reached through `Arc<Vec<Arc<PluginSlot>>>` — a
//! shared reference that a real `cpal` callback thread and a UI/mutation
//! thread can each hold at once — so every field a slot exposes through
//! that shared reference uses [`atomic_refcell::AtomicRefCell`] rather
//! than [`std::cell::RefCell`]: same borrow-checked API, but `Sync`
//! wherever its contents are `Send`, which a plain `RefCell` never is.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use arc_swap::ArcSwap;
use atomic_refcell::AtomicRefCell;

use crate::plugin::Plugin;

/// One slot in a channel's plugin chain.
///
/// Addressed by `instance_id`, not by its position in the chain — position
/// shifts on reorder, but the id is assigned once at insertion and never
/// reused, so in-flight [`crate::paramqueue::ParameterChange`] entries
/// enqueued against an id either land on the right plugin or are silently
/// discarded if that plugin has since been removed.
pub struct PluginSlot {
    /// Unique, never-reused identifier for this slot's plugin instance.
    pub instance_id: u64,
    /// The plugin itself. Wrapped in an [`AtomicRefCell`] because a
    /// published chain is reached through `Arc<Vec<PluginSlot>>` — a
    /// shared reference — yet the audio thread still needs `&mut dyn
    /// Plugin` to call `process`. The audio thread is the only caller
    /// that ever borrows this mutably, and does so once per slot per
    /// block, so the runtime borrow check never contends.
    pub plugin: AtomicRefCell<Box<dyn Plugin>>,
    /// Whether this slot is currently bypassed. Bypass toggling crossfades
    /// over [`crate::param::LinearSmoothedParam`]'s default ramp rather
    /// than switching instantaneously. An [`AtomicBool`] for the same
    /// reason `plugin` is: a [`crate::paramqueue::ParameterChangeKind::PluginBypass`]
    /// update mutates a live, published slot through a shared reference.
    pub bypassed: AtomicBool,
    /// Crossfade ramp between dry and wet signal when `bypassed` changes.
    pub bypass_fade: AtomicRefCell<crate::param::LinearSmoothedParam>,
    /// Cached latency, refreshed after every `initialize` call so the
    /// chain's cumulative-latency prefix sum never calls into a plugin
    /// mid-block.
    pub cached_latency_samples: u32,
}

impl PluginSlot {
    /// Wraps a freshly constructed plugin into a new slot with the given
    /// stable instance id.
    pub fn new(instance_id: u64, plugin: Box<dyn Plugin>, sample_rate: f32) -> Self {
        let cached_latency_samples = plugin.latency_samples();
        let mut bypass_fade = crate::param::LinearSmoothedParam::with_config(1.0, sample_rate, 5.0);
        bypass_fade.snap_to_target();
        Self {
            instance_id,
            plugin: AtomicRefCell::new(plugin),
            bypassed: AtomicBool::new(false),
            bypass_fade: AtomicRefCell::new(bypass_fade),
            cached_latency_samples,
        }
    }

    /// Refreshes the cached latency from the plugin. Call after any
    /// `initialize` or configuration change.
    pub fn refresh_latency(&mut self) {
        self.cached_latency_samples = self.plugin.borrow().latency_samples();
    }
}

/// An ordered, atomically-published sequence of [`PluginSlot`]s for one
/// channel.
///
/// The first slot (index 0) is always the channel's input-stage plugin
/// (`Input` or `BusInput`) and defines the split point used by `Copy`: the
/// slot index after which the captured buffer is handed off to a new
/// channel's `CopyBus`.
pub struct PluginChain {
    current: ArcSwap<Vec<Arc<PluginSlot>>>,
}

impl PluginChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self { current: ArcSwap::from_pointee(Vec::new()) }
    }

    /// Loads the currently published slot list. Cheap: one atomic pointer
    /// load plus an `Arc` clone (refcount bump, no deep copy). Each element
    /// is itself an `Arc<PluginSlot>`, so a mutation that touches only one
    /// slot (reorder, single insert/remove) can build the new list by
    /// cloning the unaffected `Arc`s rather than recreating every plugin.
    pub fn load(&self) -> Arc<Vec<Arc<PluginSlot>>> {
        self.current.load_full()
    }

    /// Publishes a brand-new slot list, replacing whatever was published
    /// before. Called only from UI-thread mutation methods.
    pub fn publish(&self, slots: Vec<Arc<PluginSlot>>) {
        self.current.store(Arc::new(slots));
    }

    /// Publishes a brand-new slot list and hands back the `Arc` that was
    /// published before it, so a caller that needs to defer dropping the
    /// retired slots (never on the audio thread) can hold onto it.
    pub fn swap(&self, slots: Vec<Arc<PluginSlot>>) -> Arc<Vec<Arc<PluginSlot>>> {
        self.current.swap(Arc::new(slots))
    }

    /// Builds a new chain that starts out pointing at whatever this one
    /// currently has published. Used when a [`crate::routing::RoutingSnapshot`]
    /// is rebuilt around an unchanged channel: the rebuilt channel's chain
    /// shares the live, published slots (and their in-progress bypass
    /// fades and plugin state) instead of losing them, and needs only a
    /// shared reference to do it — no exclusive ownership of the old
    /// snapshot required.
    pub fn share(&self) -> Self {
        Self { current: ArcSwap::new(self.current.load_full()) }
    }

    /// Cumulative latency in samples of every slot up to (not including)
    /// `slot_index`, computed from the currently published chain's
    /// cached per-slot latencies.
    pub fn cumulative_latency_before(&self, slot_index: usize) -> u32 {
        self.load()
            .iter()
            .take(slot_index)
            .map(|slot| slot.cached_latency_samples)
            .sum()
    }

    /// Total latency of the whole chain, in samples.
    pub fn total_latency(&self) -> u32 {
        self.load().iter().map(|slot| slot.cached_latency_samples).sum()
    }
}

impl Default for PluginChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::ProcessContext;

    struct UnitGain(u32);
    impl Plugin for UnitGain {
        fn identify(&self) -> &str {
            "unit_gain"
        }
        fn initialize(&mut self, _sample_rate: f32, _block_size: usize) -> Result<(), &'static str> {
            Ok(())
        }
        fn process(&mut self, _buffer: &mut [f32], _ctx: &ProcessContext<'_>) {}
        fn latency_samples(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn test_empty_chain_has_zero_latency() {
        let chain = PluginChain::new();
        assert_eq!(chain.total_latency(), 0);
    }

    #[test]
    fn test_cumulative_latency_prefix_sum() {
        let chain = PluginChain::new();
        let slots = vec![
            Arc::new(PluginSlot::new(1, Box::new(UnitGain(10)), 48000.0)),
            Arc::new(PluginSlot::new(2, Box::new(UnitGain(20)), 48000.0)),
            Arc::new(PluginSlot::new(3, Box::new(UnitGain(5)), 48000.0)),
        ];
        chain.publish(slots);

        assert_eq!(chain.cumulative_latency_before(0), 0);
        assert_eq!(chain.cumulative_latency_before(1), 10);
        assert_eq!(chain.cumulative_latency_before(2), 30);
        assert_eq!(chain.cumulative_latency_before(3), 35);
        assert_eq!(chain.total_latency(), 35);
    }

    #[test]
    fn test_instance_id_survives_reorder() {
        let chain = PluginChain::new();
        chain.publish(vec![
            Arc::new(PluginSlot::new(1, Box::new(UnitGain(1)), 48000.0)),
            Arc::new(PluginSlot::new(2, Box::new(UnitGain(2)), 48000.0)),
        ]);

        let loaded = chain.load();
        let mut reordered: Vec<Arc<PluginSlot>> = loaded.iter().cloned().collect();
        reordered.reverse();
        chain.publish(reordered);

        let loaded = chain.load();
        assert_eq!(loaded[0].instance_id, 2);
        assert_eq!(loaded[1].instance_id, 1);
    }

    #[test]
    fn test_bypass_fade_starts_settled() {
        let slot = PluginSlot::new(1, Box::new(UnitGain(0)), 48000.0);
        assert!(slot.bypass_fade.borrow().is_settled());
    }
}
