//! Bounded, fail-fast multi-producer/single-consumer queue for parameter
//! changes flowing from UI threads into the audio thread.
//!
//! Built on [`crossbeam_channel`]'s bounded channel: `try_send` never blocks
//! and returns immediately when the queue is full, which is exactly the
//! fail-fast contract the audio callback needs — a full queue means the UI
//! is producing changes faster than the audio thread can drain them, and the
//! correct response is to drop the newest change and count it, not to stall
//! either side.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

/// The kind of parameter mutation a [`ParameterChange`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChangeKind {
    /// Channel input gain, in decibels.
    InputGainDb,
    /// Channel output gain, in decibels.
    OutputGainDb,
    /// Channel mute toggle.
    Mute,
    /// Channel solo toggle.
    Solo,
    /// Plugin bypass toggle.
    PluginBypass,
    /// A single plugin parameter, addressed by index.
    PluginParameter,
    /// An opaque plugin command (see [`crate::plugin::CommandHandler`]).
    PluginCommand,
}

/// A single parameter mutation enqueued by a UI thread for the audio thread
/// to apply at the start of its next block.
#[derive(Debug, Clone, Copy)]
pub struct ParameterChange {
    /// The channel this change targets.
    pub channel_id: u64,
    /// What kind of change this is.
    pub kind: ParameterChangeKind,
    /// The plugin instance this change targets, if `kind` is
    /// plugin-specific. Ignored for channel-level kinds.
    pub plugin_instance_id: u64,
    /// The parameter index within the plugin's descriptor table, if
    /// `kind` is [`ParameterChangeKind::PluginParameter`].
    pub param_index: u32,
    /// The new value. Interpretation depends on `kind`.
    pub value: f32,
    /// An opaque command payload, used only for
    /// [`ParameterChangeKind::PluginCommand`].
    pub command: u64,
}

/// Producer handle. Cloneable — any number of UI threads may hold one.
#[derive(Clone)]
pub struct ParameterQueueSender {
    tx: Sender<ParameterChange>,
}

/// Consumer handle. Owned by the audio thread; never cloned or shared.
pub struct ParameterQueueReceiver {
    rx: Receiver<ParameterChange>,
}

/// Creates a bounded parameter queue with room for `capacity` pending
/// changes before producers start failing fast.
pub fn parameter_queue(capacity: usize) -> (ParameterQueueSender, ParameterQueueReceiver) {
    let (tx, rx) = bounded(capacity);
    (ParameterQueueSender { tx }, ParameterQueueReceiver { rx })
}

impl ParameterQueueSender {
    /// Attempts to enqueue a change. Returns `false` without blocking if the
    /// queue is full; the caller should increment a
    /// `parameter_queue_overflow` counter and surface it to the UI.
    pub fn try_send(&self, change: ParameterChange) -> bool {
        match self.tx.try_send(change) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }
}

impl ParameterQueueReceiver {
    /// Drains a single pending change, if any, without blocking.
    pub fn try_recv(&self) -> Option<ParameterChange> {
        match self.rx.try_recv() {
            Ok(change) => Some(change),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drains every pending change, invoking `apply` for each in arrival
    /// order. Called once per block at the top of the output pipeline.
    pub fn drain(&self, mut apply: impl FnMut(ParameterChange)) {
        while let Some(change) = self.try_recv() {
            apply(change);
        }
    }
}
