pub mod assemble;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod frame;
pub mod game_log;
pub mod http_client;
pub mod model;
pub mod opponents;
pub mod partition;
pub mod pipeline;
pub mod providers;
pub mod season_stats;
pub mod stats;
