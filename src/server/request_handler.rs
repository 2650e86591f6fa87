use crate::config::Config;
use crate::server::request_info::RequestMetadata;
use crate::server::response::{ErrorResponse, RedirectResponse};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Request, Response};
use std::net::SocketAddr;
use tracing::debug;
use uuid::Uuid;

/// Redirects requests addressed to one of this process's own server names.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    server_names: Vec<String>,
}

impl RequestHandler {
    pub fn new(config: &Config) -> Self {
        Self::with_server_names([
            config.http.server_name.as_str(),
            config.https.server_name.as_str(),
        ])
    }

    pub fn with_server_names<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let server_names = names
            .into_iter()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Self { server_names }
    }

    pub fn is_redirect_eligible(&self, metadata: &RequestMetadata) -> bool {
        self.server_names
            .iter()
            .any(|name| *name == metadata.requested_host)
    }

    /// Any method, any path. The body is never read.
    pub fn handle_request<B>(
        &self,
        req: &Request<B>,
        client_addr: SocketAddr,
    ) -> Response<Full<Bytes>> {
        let request_id = Uuid::new_v4();

        // absolute-form targets carry their own authority
        let host = req
            .uri()
            .authority()
            .map(|authority| authority.as_str())
            .or_else(|| req.headers().get(header::HOST).and_then(|h| h.to_str().ok()));
        let forwarded_for = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok());

        let metadata = RequestMetadata::classify(&client_addr.to_string(), host, forwarded_for);

        let response = if self.is_redirect_eligible(&metadata) {
            RedirectResponse::found_root().build()
        } else {
            ErrorResponse::not_found().build()
        };

        debug!(
            request_id = %request_id,
            method = %req.method(),
            uri = %req.uri(),
            requested_host = %metadata.requested_host,
            requested_port = %metadata.requested_port,
            status = response.status().as_u16(),
            "{}",
            metadata
        );

        response
    }
}
