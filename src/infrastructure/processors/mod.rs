// Processors module
pub mod css_processor;
pub mod minifier;
pub mod module_scan;
pub mod scss_processor;
pub mod script_processor;

pub use css_processor::*;
pub use minifier::*;
pub use module_scan::*;
pub use scss_processor::*;
pub use script_processor::*;
