pub use openid_observability::{
    annotate_span_with_trace_ids, encode_prometheus_text, init_telemetry, shutdown_telemetry,
};
