//! Application served by the `drainerd` binary.

use crate::server::{Request, RequestProcessor, Response};

/// Answers `GET /` with `ready` and everything else with 404.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultApp;

impl RequestProcessor for DefaultApp {
    fn process(&self, request: &Request) -> Response {
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/") => Response::text(200, "ready"),
            _ => Response::empty(404),
        }
    }
}
