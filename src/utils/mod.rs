// Shared utilities module
pub mod errors;
pub mod logging;
pub mod config_loader;
pub mod source_maps;
pub mod incremental;
pub mod build_ui;

pub use errors::*;
pub use logging::*;
pub use config_loader::*;
pub use source_maps::*;
pub use incremental::*;
pub use build_ui::*;
