pub mod http_server;
pub mod listener;
pub mod request_handler;
pub mod request_info;
pub mod response;
pub mod tls;

pub use http_server::HttpServer;
pub use listener::{BoundListener, ListenerIdentity, ListenerSupervisor, Protocol};
pub use request_handler::RequestHandler;
pub use request_info::RequestMetadata;
pub use response::{ErrorResponse, RedirectResponse, ResponseBuilder};
pub use tls::TlsManager;
