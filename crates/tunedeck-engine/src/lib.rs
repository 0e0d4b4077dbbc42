//! Streaming playback core: format sniffing, decoder adapters, and a slot-based
//! playback engine feeding an asynchronous audio sink.

pub mod config;
pub mod decoder;
pub mod device;
pub mod engine;
pub mod error;
pub mod output;
pub mod player;
pub mod resample;
pub mod ring;
pub mod sim;
pub mod sink;
pub mod sniff;
pub mod status;
pub mod watchdog;

pub use tunedeck_types as types;
