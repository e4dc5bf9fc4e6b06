pub mod cli;
pub mod config;
pub mod embed;
pub mod imsim;
pub mod rank;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use imsim::{ImSim, ImSimBuilder};
