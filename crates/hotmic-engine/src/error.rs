//! Engine-level errors surfaced by the graph mutation API.
//!
//! Mirrors `hotmic-io::Error`'s shape: one enum, `#[error(...)]` display
//! strings, `#[from]` for wrapped backend errors. The audio thread itself
//! never returns one of these — its failures become counters and status
//! flags on [`crate::diagnostics::Diagnostics`] instead.

/// Errors a graph mutation or engine control call can return.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A plugin's `initialize` rejected the session's sample rate or block
    /// size. The plugin is bypassed; the snapshot is still published.
    #[error("plugin '{plugin}' rejected configuration: {reason}")]
    ConfigurationRejected {
        /// The rejecting plugin's identify string.
        plugin: String,
        /// The rejection reason the plugin reported.
        reason: String,
    },

    /// The requested mutation would introduce a cycle in the routing
    /// dependency graph. Refused; the previous snapshot remains active.
    #[error("mutation would introduce a routing cycle")]
    CycleDetected,

    /// The same audio device is already bound to another channel, two
    /// `OutputSend` plugins would become simultaneously active, or a copy
    /// mutation targets an existing channel.
    #[error("duplicate binding: {0}")]
    DuplicateBinding(String),

    /// More than one non-bypassed `OutputSend` would result from this
    /// mutation.
    #[error("at most one active OutputSend plugin is allowed")]
    DuplicateOutputSend,

    /// No channel with this id exists in the current snapshot.
    #[error("channel {0} not found")]
    ChannelNotFound(u64),

    /// No plugin with this instance id exists on the named channel.
    #[error("plugin instance {instance_id} not found on channel {channel_id}")]
    PluginNotFound {
        /// The channel searched.
        channel_id: u64,
        /// The instance id that wasn't found.
        instance_id: u64,
    },

    /// A copy-created channel's slot 0 must be `BusInput`; the engine
    /// refuses to construct one without it.
    #[error("copy-created channels must start with a BusInput plugin")]
    MissingBusInput,

    /// The audio I/O backend failed to enumerate devices or build a
    /// stream.
    #[error(transparent)]
    Backend(#[from] hotmic_io::Error),

    /// A graph mutation couldn't acquire the engine's mutation lock, which
    /// serializes concurrent mutation calls against each other (never
    /// against the audio thread — a mutation builds its replacement
    /// snapshot from `Channel::share`d copies of the live one, so it never
    /// needs exclusive ownership of anything the audio thread might be
    /// holding). Only possible under concurrent mutation calls from more
    /// than one caller; the previous snapshot remains active.
    #[error("mutation contended: gave up after {attempts} attempts")]
    MutationContended {
        /// Number of retry attempts made before giving up.
        attempts: u32,
    },
}

/// Convenience result type for fallible, non-realtime engine APIs.
pub type Result<T> = std::result::Result<T, EngineError>;
