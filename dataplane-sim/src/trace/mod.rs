//! Hop-by-hop simulation of flows through a [`DataPlane`](crate::network::DataPlane)

pub mod batch;
pub mod flow_trace;
pub mod settings;
pub mod tracer;

pub use batch::{TraceBatch, compute_traces};
pub use flow_trace::{FlowDisposition, FlowTrace, FlowTraceHop};
pub use settings::{MultipathPolicy, TraceSettings};
pub use tracer::FlowTracer;
