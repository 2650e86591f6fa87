pub mod config;
pub mod logging;
pub mod server;
pub mod shutdown;

// Re-export commonly used types for easier testing
pub use config::{Config, ConfigError, ConfigResolver};
pub use server::http_server::HttpServer;
pub use server::request_handler::RequestHandler;
pub use shutdown::{ShutdownCoordinator, ShutdownSignal, ShutdownState};
