mod control_listener;
mod health_endpoint;

pub use control_listener::{
    parse_request_line, ControlListener, ControlRequest, ControlResponse, DEFAULT_READ_TIMEOUT,
    MAX_REQUEST_BYTES,
};
pub use health_endpoint::{router as health_router, status_code, HealthEndpoint};
