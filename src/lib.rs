//! Playback queue and session engine behind the bot: the per-guild track
//! queue, the play/pause/next/prev/repeat state machine, the session
//! registry owning the voice transport handles, and the socket event
//! fan-out. The binary wires this to Discord (serenity + songbird), to
//! SoundCloud (yt-dlp), and to a websocket gateway.

pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod player;
pub mod provider;
pub mod queue;
pub mod session;
pub mod store;
pub mod transport;
