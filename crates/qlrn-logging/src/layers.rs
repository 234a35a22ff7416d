//! Custom tracing layers
//!
//! [`NodeContextLayer`] attaches the active node context to each new span.
//! [`jsonl_layer`] builds the JSON formatter shared by console and file
//! output.

use tracing::{Subscriber, span};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::{LookupSpan, SpanRef};

use crate::config::JsonlConfig;
use crate::context::{NodeContextData, NodeContextGuard};

/// Layer that attaches node context to spans
///
/// When a [`NodeContextGuard`] is active, every span created on that thread
/// gets a [`NodeContextExtension`]. Spans opened outside any guard inherit
/// the extension of their parent, so work spawned by a node stays tagged.
pub struct NodeContextLayer;

impl NodeContextLayer {
    /// Create a new node context layer
    pub fn new() -> Self {
        Self
    }
}

impl Default for NodeContextLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let data = NodeContextGuard::current().or_else(|| {
            span.parent()
                .and_then(|parent| node_context_of(&parent))
        });
        if let Some(data) = data {
            span.extensions_mut().insert(NodeContextExtension { data });
        }
    }
}

/// Read the node context recorded on a span
pub fn node_context_of<'a, R>(span: &SpanRef<'a, R>) -> Option<NodeContextData>
where
    R: LookupSpan<'a>,
{
    span.extensions()
        .get::<NodeContextExtension>()
        .map(|ext| ext.data.clone())
}

/// Create a JSONL formatting layer
///
/// Configures tracing-subscriber's JSON formatter from a [`JsonlConfig`].
pub fn jsonl_layer<S, W>(
    writer: W,
    config: &JsonlConfig,
) -> tracing_subscriber::fmt::Layer<S, JsonFields, Format<Json>, W>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(config.include_current_span)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
}
