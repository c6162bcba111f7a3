//! # Audio Module
//!
//! Playback sessions, one per guild, driven by text commands and by the
//! voice transport's track events.
//!
//! ## Architecture
//!
//! ### [`player`] - Session registry
//! - Opens, advances and tears down sessions
//! - Serializes every command and event of a guild through the session mutex
//! - Consumes [`transport::TransportEvent`]s in arrival order
//!
//! ### [`queue`] - Track queue
//! - Ordered list plus cursor; played tracks are kept for `previous` and loop
//! - Repeat and loop modes, capacity bound, in-place shuffle
//!
//! ### [`dj`] - DJ authorization
//! - Lock predicate for queue and playback commands
//! - DJ-required predicate for lock toggling and DJ swaps
//!
//! ### [`transport`] / [`songbird_transport`] - Voice connection
//! - [`transport::VoiceTransport`] is what the registry talks to
//! - [`songbird_transport::SongbirdTransport`] implements it over songbird and yt-dlp
//!
//! ## Session lifecycle
//!
//! ```text
//! Absent → Connecting → Idle | Playing ⇄ Paused → Destroyed
//! ```
//!
//! A session that runs out of tracks without loop is destroyed; that is the
//! normal end of playback, not an error.

pub mod dj;
pub mod equalizer;
pub mod player;
pub mod queue;
pub mod session;
pub mod songbird_transport;
pub mod transport;
