pub mod config;
pub mod directory;
pub mod error;
pub mod handoff;
pub mod history;
pub mod loader;
pub mod matcher;
pub mod models;
pub mod relations;
pub mod resolver;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
