//! Database initialization, migrations, settings and retry helpers

pub mod init;
pub mod migrations;
pub mod retry;
pub mod settings;

pub use init::*;
pub use migrations::run_migrations;
pub use retry::retry_on_lock;
