//! HotMic Core - real-time DSP primitives, plugin contract, and routing data model.
//!
//! This crate provides the allocation-free building blocks the audio engine's
//! callback runs on, plus the (non-realtime) data model UI threads use to
//! describe channels, plugin chains, and routing. Nothing in the audio
//! callback path requires more than the `no_std` primitive modules; `std`
//! only gates the lock-free ring/queue wrappers and the higher-level
//! routing types that need `Vec`/`Arc`.
//!
//! # Layers
//!
//! - [`ring`], [`paramqueue`] — lock-free SPSC/MPSC primitives crossing the
//!   UI/capture/audio thread boundary.
//! - [`param`] — parameter smoothing ([`param::SmoothedParam`],
//!   [`param::LinearSmoothedParam`]).
//! - [`param_info`] — parameter descriptor and introspection types.
//! - [`biquad`], [`envelope`], [`meter`] — filter and metering primitives,
//!   including the K-weighted loudness meter.
//! - [`plugin`] — the plugin contract (required trait plus optional
//!   capability traits) every in-process effect implements.
//! - [`chain`] — ordered per-channel plugin chains with atomic snapshot
//!   publication.
//! - [`routing`] — channels, copy/output buses, and the routing snapshot
//!   the audio thread executes each block.
//! - [`analysis`] — the cross-channel analysis signal bus.
//!
//! # no_std support
//!
//! The math/filter/parameter primitives are `no_std` compatible. Disable
//! the default `std` feature to use them on embedded targets; the ring
//! buffer, parameter queue, plugin chain, and routing modules require
//! `std` and are unavailable in that configuration.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod biquad;
pub mod envelope;
pub mod fast_math;
pub mod math;
pub mod one_pole;
pub mod param;
pub mod param_info;

#[cfg(feature = "std")]
pub mod analysis;
#[cfg(feature = "std")]
pub mod chain;
#[cfg(feature = "std")]
pub mod meter;
#[cfg(feature = "std")]
pub mod paramqueue;
#[cfg(feature = "std")]
pub mod plugin;
#[cfg(feature = "std")]
pub mod ring;
#[cfg(feature = "std")]
pub mod routing;

pub use biquad::{
    Biquad, bandpass_coefficients, highpass_coefficients, highshelf_coefficients,
    lowpass_coefficients, notch_coefficients, peaking_eq_coefficients,
};
pub use envelope::EnvelopeFollower;
pub use fast_math::{
    fast_db_to_linear, fast_exp2, fast_linear_to_db, fast_log2, fast_sin_turns, fast_tan,
};
pub use math::{
    asymmetric_clip, db_to_linear, fast_tanh, flush_denormal, foldback, hard_clip, linear_to_db,
    mono_sum, soft_clip,
};
pub use one_pole::OnePole;
pub use param::{LinearSmoothedParam, SmoothedParam};
pub use param_info::{ParamDescriptor, ParamUnit, ParameterInfo};

#[cfg(feature = "std")]
pub use analysis::{AnalysisSignalBus, SignalKind};
#[cfg(feature = "std")]
pub use chain::{PluginChain, PluginSlot};
#[cfg(feature = "std")]
pub use meter::{LufsMeter, Meter};
#[cfg(feature = "std")]
pub use paramqueue::{
    ParameterChange, ParameterChangeKind, ParameterQueueReceiver, ParameterQueueSender,
    parameter_queue,
};
#[cfg(feature = "std")]
pub use plugin::{
    AnalysisSignalConsumer, AnalysisSignalProducer, CommandHandler, InputStagePlugin,
    OutputSendPlugin, Plugin, PluginWithParams, ProcessContext, RoutingDependencyProvider,
};
#[cfg(feature = "std")]
pub use ring::{FloatRingConsumer, FloatRingProducer, float_ring};
#[cfg(feature = "std")]
pub use routing::{Channel, CopyBus, OutputBus, OutputBusMode, RoutingSnapshot};
