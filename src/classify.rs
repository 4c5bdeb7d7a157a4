//! Severity classification and label extraction for event objects.

use k8s_openapi::api::core::v1::Event as CoreEvent;

/// Coarse severity of an event, selecting the counter family it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeverityBucket {
    Normal,
    Warning,
    /// Anything the apiserver reports outside the two documented types,
    /// including an absent type.
    Unknown,
}

/// The label values identifying one counter series, in schema order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventLabels {
    pub involved_object_kind: String,
    pub involved_object_name: String,
    pub involved_object_namespace: String,
    pub reason: String,
    pub source_component: String,
    pub source_host: String,
}

impl EventLabels {
    /// Label names, in the same order as [`values`](Self::values).
    pub const NAMES: [&'static str; 6] = [
        "involved_object_kind",
        "involved_object_name",
        "involved_object_namespace",
        "reason",
        "source_component",
        "source_host",
    ];

    pub fn values(&self) -> [&str; 6] {
        [
            &self.involved_object_kind,
            &self.involved_object_name,
            &self.involved_object_namespace,
            &self.reason,
            &self.source_component,
            &self.source_host,
        ]
    }
}

/// Maps an event to its severity bucket and counter labels.
///
/// Total over all inputs: unrecognized types fall into
/// [`SeverityBucket::Unknown`] and absent fields become empty labels,
/// verbatim otherwise.
pub fn classify(event: &CoreEvent) -> (SeverityBucket, EventLabels) {
    let bucket = match event.type_.as_deref() {
        Some("Normal") => SeverityBucket::Normal,
        Some("Warning") => SeverityBucket::Warning,
        _ => SeverityBucket::Unknown,
    };

    let source = event.source.clone().unwrap_or_default();
    let labels = EventLabels {
        involved_object_kind: event.involved_object.kind.clone().unwrap_or_default(),
        involved_object_name: event.involved_object.name.clone().unwrap_or_default(),
        involved_object_namespace: event.involved_object.namespace.clone().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        source_component: source.component.unwrap_or_default(),
        source_host: source.host.unwrap_or_default(),
    };

    (bucket, labels)
}
