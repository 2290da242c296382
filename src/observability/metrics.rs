use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub sweep_closed_total: IntCounterVec,
    pub active_worker_shifts: IntGauge,
    pub active_driver_sessions: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Committed order transitions by action"),
            &["action"],
        )
        .expect("valid transitions_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Notification fan-outs by audience"),
            &["audience"],
        )
        .expect("valid notifications_total metric");

        let sweep_closed_total = IntCounterVec::new(
            Opts::new("sweep_closed_total", "Rows closed or cancelled by sweep jobs"),
            &["job"],
        )
        .expect("valid sweep_closed_total metric");

        let active_worker_shifts =
            IntGauge::new("active_worker_shifts", "Currently open worker shifts")
                .expect("valid active_worker_shifts metric");

        let active_driver_sessions =
            IntGauge::new("active_driver_sessions", "Currently open driver sessions")
                .expect("valid active_driver_sessions metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(sweep_closed_total.clone()))
            .expect("register sweep_closed_total");
        registry
            .register(Box::new(active_worker_shifts.clone()))
            .expect("register active_worker_shifts");
        registry
            .register(Box::new(active_driver_sessions.clone()))
            .expect("register active_driver_sessions");

        Self {
            registry,
            transitions_total,
            notifications_total,
            sweep_closed_total,
            active_worker_shifts,
            active_driver_sessions,
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
