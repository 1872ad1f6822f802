pub mod logging;
pub mod trace_context;

pub use logging::init_tracing;
pub use trace_context::{trace_headers, REQUEST_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER};
