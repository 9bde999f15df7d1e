use prometheus::{
    Encoder, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_passes_total: IntCounter,
    pub assignments_total: IntCounterVec,
    pub dispatch_pass_duration_seconds: Histogram,
    pub pending_requests: IntGauge,
    pub driver_utilization: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_passes_total = IntCounter::new(
            "dispatch_passes_total",
            "Total dispatch passes run by the reactive loop",
        )
        .expect("valid dispatch_passes_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let dispatch_pass_duration_seconds = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "dispatch_pass_duration_seconds",
                "Duration of one dispatch pass in seconds",
            ),
        )
        .expect("valid dispatch_pass_duration_seconds metric");

        let pending_requests = IntGauge::new(
            "pending_requests",
            "Ride requests currently waiting for a driver",
        )
        .expect("valid pending_requests metric");

        let driver_utilization = GaugeVec::new(
            Opts::new("driver_utilization", "Driver seat utilization ratio [0..1]"),
            &["driver_id"],
        )
        .expect("valid driver_utilization metric");

        registry
            .register(Box::new(dispatch_passes_total.clone()))
            .expect("register dispatch_passes_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(dispatch_pass_duration_seconds.clone()))
            .expect("register dispatch_pass_duration_seconds");
        registry
            .register(Box::new(pending_requests.clone()))
            .expect("register pending_requests");
        registry
            .register(Box::new(driver_utilization.clone()))
            .expect("register driver_utilization");

        Self {
            registry,
            dispatch_passes_total,
            assignments_total,
            dispatch_pass_duration_seconds,
            pending_requests,
            driver_utilization,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
