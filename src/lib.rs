pub mod bootstrap;
pub mod config;
pub mod context;
pub mod currency;
pub mod dedup;
pub mod dom;
pub mod engine;
pub mod game;
pub mod network;
pub mod normalizer;
pub mod page;
pub mod persistence;
pub mod presentation;
pub mod relay;
pub mod reporter;
pub mod state;
pub mod types;

/// Store key holding the session stats snapshot.
pub const STATS_KEY: &str = "duelStats";

/// Prefix of short-lived store keys subject to garbage collection.
pub const TEMP_KEY_PREFIX: &str = "duelTemp_";

/// Host serving the tracked game pages.
pub const GAME_HOST: &str = "duel.com";
