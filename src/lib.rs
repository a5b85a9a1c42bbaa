pub mod config;
pub mod console;
pub mod deps;
pub mod port;
pub mod session;
pub mod supervisor;
pub mod utils;
