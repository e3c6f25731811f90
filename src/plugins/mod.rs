pub mod core;
pub mod orders;
pub mod player;
pub mod render2d;
pub mod server;
pub mod snapshot;
pub mod ui;
