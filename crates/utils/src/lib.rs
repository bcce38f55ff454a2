pub mod logging;
pub mod version;
