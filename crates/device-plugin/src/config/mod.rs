pub mod cli;
pub mod plugin;

pub use cli::*;
pub use plugin::*;
