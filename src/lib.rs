pub mod catalog;
pub mod cli;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod driver;
pub mod driver_couchbase;
pub mod editor;
pub mod errors;
pub mod explorer;
pub mod models;
pub mod modules;
pub mod settings;
pub mod target;
pub mod tree;

pub use connection::{ConnectionRegistry, Session};
pub use errors::ExplorerError;
pub use explorer::ExplorerController;
pub use tree::{ExplorerTree, NodeId, NodeKind, TreeNode};

/// Load `.env` and start `env_logger` with this crate at debug level.
/// Safe to call more than once.
pub fn init_logging() {
    dotenv::dotenv().ok();
    let _ = env_logger::Builder::from_default_env()
        .filter_module("couchbase_explorer", log::LevelFilter::Debug)
        .is_test(false)
        .try_init();
}

/// Headless entrypoint used by the binary.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    cli::run()
}
