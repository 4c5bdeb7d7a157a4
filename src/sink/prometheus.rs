//! Prometheus-backed counter sink and the scrape endpoint serving it.

use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use super::{CounterSink, SinkError};
use crate::classify::{EventLabels, SeverityBucket};

/// One counter family per severity bucket, all registered on the same
/// registry and labeled with [`EventLabels::NAMES`].
#[derive(Clone)]
pub struct PrometheusSink {
    normal: IntCounterVec,
    warning: IntCounterVec,
    unknown: IntCounterVec,
}

impl PrometheusSink {
    pub fn new(registry: &Registry) -> Result<Self, SinkError> {
        Ok(Self {
            normal: family(
                registry,
                "kubernetes_event_normal_total",
                "Total number of normal events in the kubernetes cluster",
            )?,
            warning: family(
                registry,
                "kubernetes_event_warning_total",
                "Total number of warning events in the kubernetes cluster",
            )?,
            unknown: family(
                registry,
                "kubernetes_event_unknown_total",
                "Total number of events with an unrecognized type in the kubernetes cluster",
            )?,
        })
    }

    fn family_for(&self, bucket: SeverityBucket) -> &IntCounterVec {
        match bucket {
            SeverityBucket::Normal => &self.normal,
            SeverityBucket::Warning => &self.warning,
            SeverityBucket::Unknown => &self.unknown,
        }
    }
}

fn family(registry: &Registry, name: &str, help: &str) -> Result<IntCounterVec, SinkError> {
    let vec = IntCounterVec::new(Opts::new(name, help), &EventLabels::NAMES)
        .map_err(|err| SinkError::Registration(err.into()))?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(|err| SinkError::Registration(err.into()))?;
    Ok(vec)
}

impl CounterSink for PrometheusSink {
    fn increment(&self, bucket: SeverityBucket, labels: &EventLabels) -> Result<(), SinkError> {
        let values = labels.values();
        let counter = self
            .family_for(bucket)
            .get_metric_with_label_values(&values)
            .map_err(|err| SinkError::Cardinality(err.into()))?;
        counter.inc();
        Ok(())
    }
}

/// Serves the registry's metrics on `/metrics` until the server fails or
/// the process exits.
pub async fn serve_metrics(registry: Registry, addr: SocketAddr) -> Result<(), hyper::Error> {
    let make_service = make_service_fn(move |_| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move { Ok::<_, Infallible>(respond(&registry, &req)) }
            }))
        }
    });

    Server::try_bind(&addr)?.serve(make_service).await
}

fn respond(registry: &Registry, req: &Request<Body>) -> Response<Body> {
    if req.uri().path() != "/metrics" {
        return Response::builder()
            .status(404)
            .body(Body::empty())
            .expect("valid HTTP response");
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        log::warn!("failed to encode metrics: {err}");
    }
    Response::builder()
        .status(200)
        .header("Content-Type", encoder.format_type())
        .body(Body::from(buffer))
        .expect("valid HTTP response")
}
