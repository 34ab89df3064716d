use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Counters shared by every clone of a [`crate::Brick`] and its pump.
#[derive(Clone)]
pub struct DeviceMetrics {
    pub transactions: IntCounter,
    pub transport_failures: IntCounter,
    pub verification_failures: IntCounter,
    pub decode_failures: IntCounter,
    pub pump_ticks: IntCounter,
    pub skipped_reads: IntCounter,
    pub devices_configured: IntGauge,
}

impl DeviceMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            transactions: IntCounter::new("bp_transactions", "Request/reply exchanges attempted")?,
            transport_failures: IntCounter::new(
                "bp_transport_failures",
                "Exchanges that failed on the bus",
            )?,
            verification_failures: IntCounter::new(
                "bp_verification_failures",
                "Replies without the accepted status",
            )?,
            decode_failures: IntCounter::new(
                "bp_decode_failures",
                "Verified replies that could not be decoded",
            )?,
            pump_ticks: IntCounter::new("bp_pump_ticks", "Update pump passes completed")?,
            skipped_reads: IntCounter::new(
                "bp_skipped_reads",
                "Device reads skipped by the update pump",
            )?,
            devices_configured: IntGauge::new(
                "bp_devices_configured",
                "Sensors and motors attached",
            )?,
        })
    }

    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.transactions.clone()),
            Box::new(self.transport_failures.clone()),
            Box::new(self.verification_failures.clone()),
            Box::new(self.decode_failures.clone()),
            Box::new(self.pump_ticks.clone()),
            Box::new(self.skipped_reads.clone()),
            Box::new(self.devices_configured.clone()),
        ]
    }
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dev: DeviceMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let dev = DeviceMetrics::new().map_err(|e| format!("metrics init error: {e}"))?;
        for collector in dev.collectors() {
            registry
                .register(collector)
                .map_err(|e| format!("metrics register error: {e}"))?;
        }
        Ok(Self { registry, dev })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
