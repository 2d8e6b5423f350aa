use crate::config::MeterConfig;
use crate::meter::{MeterStatistics, SmartMeter};
use crate::provider::HomomorphicProvider;
use serde::Serialize;
use spdlog::info;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct GridStatistics {
    pub num_meters: usize,
    pub meters: Vec<MeterStatistics>,
    pub total_readings: u64,
    pub avg_encryption_time_ms: f64,
    /// Naive estimate: total readings over the configured interval, not
    /// a measured rate.
    pub throughput_readings_per_sec: f64,
}

/// A fleet of meters sharing one provider instance, so every ciphertext
/// is produced under the same encryption context. That shared context is
/// a structural precondition for aggregating across meters.
pub struct MeterGrid {
    meters: Vec<SmartMeter>,
    config: MeterConfig,
}

impl MeterGrid {
    pub fn new(
        num_meters: usize,
        server_addr: SocketAddr,
        config: MeterConfig,
        provider: Arc<dyn HomomorphicProvider>,
    ) -> Self {
        let meters = (0..num_meters as u64)
            .map(|meter_id| {
                // Base load varies per meter so fleet readings are not
                // identical streams.
                let meter_config = MeterConfig {
                    base_load_watts: config.base_load_watts + (meter_id as f64) * 100.0,
                    ..config.clone()
                };
                SmartMeter::new(meter_id, server_addr, meter_config, provider.clone())
            })
            .collect();
        Self { meters, config }
    }

    pub fn start(&mut self) {
        for meter in &mut self.meters {
            meter.start();
        }
        info!("[Grid] started {} meters", self.meters.len());
    }

    pub fn stop(&mut self) {
        for meter in &mut self.meters {
            meter.stop();
        }
        info!("[Grid] all meters stopped");
    }

    pub fn meters(&self) -> &[SmartMeter] {
        &self.meters
    }

    pub fn statistics(&self) -> GridStatistics {
        let meters: Vec<MeterStatistics> = self.meters.iter().map(|m| m.statistics()).collect();
        let total_readings: u64 = meters.iter().map(|m| m.total_readings).sum();
        let enc_samples: u64 = meters.iter().map(|m| m.encryption.count).sum();
        let avg_encryption_time_ms = if enc_samples > 0 {
            meters
                .iter()
                .map(|m| m.encryption.mean_ms * m.encryption.count as f64)
                .sum::<f64>()
                / enc_samples as f64
        } else {
            0.0
        };
        let interval_sec = self.config.reading_interval.as_secs_f64();
        let throughput_readings_per_sec = if interval_sec > 0.0 {
            total_readings as f64 / interval_sec
        } else {
            0.0
        };

        GridStatistics {
            num_meters: self.meters.len(),
            meters,
            total_readings,
            avg_encryption_time_ms,
            throughput_readings_per_sec,
        }
    }
}
