pub mod advisory;
pub mod api;
pub mod cli;
pub mod engine;
pub mod errors;
pub mod events;
pub mod feed;
pub mod instrument;
pub mod orderbook;
pub mod orders;
pub mod runner;
pub mod state;
pub mod submit;
pub mod tick;
pub mod window;
