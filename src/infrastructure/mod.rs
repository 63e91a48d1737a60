// Infrastructure layer
pub mod asset_resolver;
pub mod dev_server;
pub mod file_system;
pub mod hmr;
pub mod hmr_client;
pub mod processors;
pub mod wasm_pack;
pub mod watcher;

pub use asset_resolver::*;
pub use file_system::*;
pub use hmr::*;
pub use hmr_client::*;
pub use processors::*;
pub use wasm_pack::*;
pub use watcher::*;
