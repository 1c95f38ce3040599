//! Reconciler metrics and the `/metrics`, `/healthz`, `/readyz` HTTP
//! server, built directly on `prometheus` + `hyper`/`hyper-util` the way
//! the storage-operator's Cargo.toml wires them up (no `axum`, no
//! `metrics`-facade crate in this binary).

use http_body_util::Full;
use hyper::{
    Request, Response,
    body::{Bytes, Incoming},
    service::service_fn,
};
use hyper_util::{rt::TokioIo, server::conn::auto::Builder};
use owo_colors::OwoColorize;
use prometheus::{CounterVec, Encoder, HistogramVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::colors::FG1;

/// Per-controller reconcile counters and timing histograms, one instance
/// per CRD controller (`RemoteCluster`, `ClusterMapping`, `NamespaceMapping`).
#[derive(Clone)]
pub struct ControllerMetrics {
    registry: Registry,
    pub reconcile_counter: CounterVec,
    pub action_counter: CounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
}

impl ControllerMetrics {
    /// `controller` labels every metric this instance owns, e.g.
    /// `"remoteclusters"`, `"clustermappings"`, `"namespacemappings"`.
    pub fn new(controller: &str) -> Self {
        let registry = Registry::new();

        let reconcile_counter = CounterVec::new(
            Opts::new(
                "dr_syncer_reconciles_total",
                "Total number of reconcile invocations.",
            )
            .const_label("controller", controller),
            &["name", "namespace"],
        )
        .expect("reconcile_counter metric is well-formed");

        let action_counter = CounterVec::new(
            Opts::new(
                "dr_syncer_actions_total",
                "Total number of reconcile actions taken, by action kind.",
            )
            .const_label("controller", controller),
            &["name", "namespace", "action"],
        )
        .expect("action_counter metric is well-formed");

        let read_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dr_syncer_reconcile_read_seconds",
                "Time spent determining the next action during reconciliation.",
            )
            .const_label("controller", controller),
            &["name", "namespace", "action"],
        )
        .expect("read_histogram metric is well-formed");

        let write_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dr_syncer_reconcile_write_seconds",
                "Time spent applying the chosen action during reconciliation.",
            )
            .const_label("controller", controller),
            &["name", "namespace", "action"],
        )
        .expect("write_histogram metric is well-formed");

        registry
            .register(Box::new(reconcile_counter.clone()))
            .expect("metric name is unique within this registry");
        registry
            .register(Box::new(action_counter.clone()))
            .expect("metric name is unique within this registry");
        registry
            .register(Box::new(read_histogram.clone()))
            .expect("metric name is unique within this registry");
        registry
            .register(Box::new(write_histogram.clone()))
            .expect("metric name is unique within this registry");

        Self {
            registry,
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
        }
    }

    fn gather(&self) -> Vec<u8> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .expect("registered metric families always encode");
        buf
    }
}

/// Merges every controller's registry into one process-wide `/metrics`
/// endpoint, plus liveness/readiness probes for the pod spec.
#[derive(Clone, Default)]
pub struct MetricsServer {
    controllers: Vec<ControllerMetrics>,
}

impl MetricsServer {
    pub fn new(controllers: Vec<ControllerMetrics>) -> Self {
        Self { controllers }
    }

    fn gather_all(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for c in &self.controllers {
            buf.extend(c.gather());
        }
        buf
    }

    pub async fn serve(
        self,
        port: u16,
        shutdown: CancellationToken,
    ) -> Result<(), std::io::Error> {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr).await?;
        println!(
            "{}{}",
            "📈 Starting metrics server • port=".color(FG1),
            port
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    println!("{}", "🛑 Metrics server stopping".color(FG1));
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, _peer) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            eprintln!("metrics server accept error: {e}");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let server = self.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let server = server.clone();
                            async move { Ok::<_, std::convert::Infallible>(server.handle(req)) }
                        });
                        if let Err(e) = Builder::new(hyper_util::rt::TokioExecutor::new())
                            .serve_connection(io, service)
                            .await
                        {
                            eprintln!("metrics server connection error: {e}");
                        }
                    });
                }
            }
        }
    }

    fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        match req.uri().path() {
            "/metrics" => Response::new(Full::new(Bytes::from(self.gather_all()))),
            "/healthz" | "/readyz" => Response::new(Full::new(Bytes::from_static(b"ok"))),
            _ => {
                let mut resp = Response::new(Full::new(Bytes::from_static(b"not found")));
                *resp.status_mut() = hyper::StatusCode::NOT_FOUND;
                resp
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_controllers_have_distinct_const_labels() {
        let a = ControllerMetrics::new("remoteclusters");
        let b = ControllerMetrics::new("clustermappings");
        a.reconcile_counter
            .with_label_values(&["r1", "ns"])
            .inc();
        b.reconcile_counter
            .with_label_values(&["r1", "ns"])
            .inc();
        let a_text = String::from_utf8(a.gather()).unwrap();
        let b_text = String::from_utf8(b.gather()).unwrap();
        assert!(a_text.contains("controller=\"remoteclusters\""));
        assert!(b_text.contains("controller=\"clustermappings\""));
    }
}
