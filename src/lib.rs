// Kiln: module bundling, asset pipeline and dev server for web front ends
// that embed a wasm-pack module

pub mod cli;
pub mod core;
pub mod infrastructure;
pub mod utils;
