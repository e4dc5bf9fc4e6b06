mod build;
mod clean;
mod search;

pub use build::*;
pub use clean::*;
pub use search::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
