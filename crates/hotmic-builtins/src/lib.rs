//! Structural routing plugins: the small set of built-in plugins every
//! channel pins into its chain to participate in cross-channel routing,
//! plus the `Merge` alignment primitive they share.
//!
//! These are ordinary [`hotmic_core::Plugin`] implementations with no
//! special engine privileges; the engine treats them exactly like any
//! third-party plugin, distinguishing them only by which capability
//! traits they implement.

mod bus_input;
mod copy;
mod delay_line;
mod input;
mod merge;
mod output_send;

pub use bus_input::BusInput;
pub use copy::CopyPlugin;
pub use delay_line::DelayLine;
pub use input::Input;
pub use merge::Merge;
pub use output_send::OutputSend;
