use crate::config::MeterConfig;
use crate::data::{EncryptedBatch, Reading, SCHEME_CKKS, unix_now};
use crate::generator::PowerProfile;
use crate::measure::{TimingRecorder, TimingStats};
use crate::provider::{HomomorphicProvider, ProviderError};
use crate::wire::{self, WireError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use spdlog::{info, warn};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("network: {0}")]
    Network(#[from] std::io::Error),
    #[error("server acknowledgment missing or malformed")]
    BadAck,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeterStatistics {
    pub meter_id: u64,
    pub total_readings: u64,
    pub batches_sent: u64,
    pub batches_dropped: u64,
    pub encryption: TimingStats,
    pub transmission: TimingStats,
}

struct MeterTimings {
    encryption: TimingRecorder,
    transmission: TimingRecorder,
}

struct MeterShared {
    running: AtomicBool,
    buffer: Mutex<VecDeque<Reading>>,
    batch_ready: Condvar,
    readings_generated: AtomicU64,
    batches_sent: AtomicU64,
    batches_dropped: AtomicU64,
    timings: Mutex<MeterTimings>,
}

/// A simulated smart meter: one read thread synthesizing readings on a
/// fixed interval into a FIFO buffer, one send thread draining
/// `batch_size` readings at a time, encrypting them through the shared
/// provider and transmitting the batch over a fresh TCP connection.
///
/// Delivery is lossy: a failed connect, write or ack drops
/// that batch permanently and the meter moves on. No retry, no
/// recovery of already-drained readings.
pub struct SmartMeter {
    meter_id: u64,
    server_addr: SocketAddr,
    config: MeterConfig,
    provider: Arc<dyn HomomorphicProvider>,
    shared: Arc<MeterShared>,
    state: MeterState,
    read_handle: Option<thread::JoinHandle<()>>,
    send_handle: Option<thread::JoinHandle<()>>,
}

impl SmartMeter {
    pub fn new(
        meter_id: u64,
        server_addr: SocketAddr,
        config: MeterConfig,
        provider: Arc<dyn HomomorphicProvider>,
    ) -> Self {
        assert!(config.batch_size >= 1, "batch_size must be at least 1");
        Self {
            meter_id,
            server_addr,
            config,
            provider,
            shared: Arc::new(MeterShared {
                running: AtomicBool::new(false),
                buffer: Mutex::new(VecDeque::new()),
                batch_ready: Condvar::new(),
                readings_generated: AtomicU64::new(0),
                batches_sent: AtomicU64::new(0),
                batches_dropped: AtomicU64::new(0),
                timings: Mutex::new(MeterTimings {
                    encryption: TimingRecorder::new(),
                    transmission: TimingRecorder::new(),
                }),
            }),
            state: MeterState::Idle,
            read_handle: None,
            send_handle: None,
        }
    }

    pub fn meter_id(&self) -> u64 {
        self.meter_id
    }

    pub fn state(&self) -> MeterState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == MeterState::Running
    }

    pub fn start(&mut self) {
        if self.state == MeterState::Running {
            return;
        }
        self.shared.running.store(true, Relaxed);

        let shared = self.shared.clone();
        let profile = PowerProfile {
            base_load_watts: self.config.base_load_watts,
            variance_watts: self.config.variance_watts,
            periodic_amplitude_watts: self.config.periodic_amplitude_watts,
        };
        let interval = self.config.reading_interval;
        let batch_size = self.config.batch_size;
        let meter_id = self.meter_id;
        let seed = self.config.rng_seed;
        self.read_handle = Some(thread::spawn(move || {
            read_loop(meter_id, shared, profile, interval, batch_size, seed)
        }));

        let shared = self.shared.clone();
        let provider = self.provider.clone();
        let server_addr = self.server_addr;
        let send_timeout = self.config.send_timeout;
        self.send_handle = Some(thread::spawn(move || {
            send_loop(meter_id, shared, provider, server_addr, batch_size, send_timeout)
        }));

        self.state = MeterState::Running;
        info!("[Meter {}] started", self.meter_id);
    }

    /// Cooperative stop: flips the flag, wakes the send loop and joins
    /// both threads within `stop_timeout`. Best-effort only; a thread
    /// blocked mid-sleep or mid-connect may outlive the bound and is
    /// then detached.
    pub fn stop(&mut self) {
        if self.state != MeterState::Running {
            return;
        }
        self.state = MeterState::Stopping;
        self.shared.running.store(false, Relaxed);
        self.shared.batch_ready.notify_all();

        let deadline = Instant::now() + self.config.stop_timeout;
        for handle in [self.read_handle.take(), self.send_handle.take()]
            .into_iter()
            .flatten()
        {
            join_until(handle, deadline, self.meter_id);
        }
        self.state = MeterState::Stopped;
        info!(
            "[Meter {}] stopped, total readings: {}",
            self.meter_id,
            self.shared.readings_generated.load(Relaxed)
        );
    }

    pub fn statistics(&self) -> MeterStatistics {
        let timings = self.shared.timings.lock().unwrap();
        MeterStatistics {
            meter_id: self.meter_id,
            total_readings: self.shared.readings_generated.load(Relaxed),
            batches_sent: self.shared.batches_sent.load(Relaxed),
            batches_dropped: self.shared.batches_dropped.load(Relaxed),
            encryption: timings.encryption.stats(),
            transmission: timings.transmission.stats(),
        }
    }

    /// Readings currently buffered and not yet drained into a batch.
    pub fn buffered_readings(&self) -> usize {
        self.shared.buffer.lock().unwrap().len()
    }
}

impl Drop for SmartMeter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_until(handle: thread::JoinHandle<()>, deadline: Instant, meter_id: u64) {
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    if handle.is_finished() {
        let _ = handle.join();
    } else {
        // The thread will exit once its blocking call returns and it
        // observes the cleared running flag.
        warn!("[Meter {}] worker still blocked at stop deadline, detaching", meter_id);
    }
}

fn read_loop(
    meter_id: u64,
    shared: Arc<MeterShared>,
    profile: PowerProfile,
    interval: Duration,
    batch_size: usize,
    seed: Option<u64>,
) {
    let mut rng = match seed {
        // Offset by meter id so grid meters sharing a configured seed
        // still produce distinct sequences.
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(meter_id)),
        None => StdRng::from_entropy(),
    };
    while shared.running.load(Relaxed) {
        let timestamp = unix_now();
        let reading = Reading {
            meter_id,
            timestamp,
            power_watts: profile.sample(&mut rng, timestamp),
            sequence_id: shared.readings_generated.fetch_add(1, Relaxed),
        };
        {
            let mut buffer = shared.buffer.lock().unwrap();
            buffer.push_back(reading);
            if buffer.len() >= batch_size {
                shared.batch_ready.notify_one();
            }
        }
        thread::sleep(interval);
    }
}

fn send_loop(
    meter_id: u64,
    shared: Arc<MeterShared>,
    provider: Arc<dyn HomomorphicProvider>,
    server_addr: SocketAddr,
    batch_size: usize,
    send_timeout: Duration,
) {
    while shared.running.load(Relaxed) {
        // Wait for the batch threshold; short timeout keeps the stop
        // flag observable while the buffer is underfull.
        let readings: Vec<Reading> = {
            let mut buffer = shared.buffer.lock().unwrap();
            loop {
                if buffer.len() >= batch_size {
                    break;
                }
                if !shared.running.load(Relaxed) {
                    return;
                }
                let (guard, _) = shared
                    .batch_ready
                    .wait_timeout(buffer, Duration::from_millis(100))
                    .unwrap();
                buffer = guard;
            }
            buffer.drain(..batch_size).collect()
        };

        match encrypt_and_send(meter_id, &shared, provider.as_ref(), server_addr, &readings, send_timeout) {
            Ok((encryption_ms, transmission_ms)) => {
                info!(
                    "[Meter {}] sent encrypted batch ({} readings, enc {:.2}ms, tx {:.2}ms)",
                    meter_id,
                    readings.len(),
                    encryption_ms,
                    transmission_ms
                );
            }
            Err(e) => {
                // Readings already drained from the buffer are gone.
                shared.batches_dropped.fetch_add(1, Relaxed);
                warn!(
                    "[Meter {}] dropped batch of {} readings: {}",
                    meter_id,
                    readings.len(),
                    e
                );
            }
        }
    }
}

fn encrypt_and_send(
    meter_id: u64,
    shared: &MeterShared,
    provider: &dyn HomomorphicProvider,
    server_addr: SocketAddr,
    readings: &[Reading],
    send_timeout: Duration,
) -> Result<(f64, f64), MeterError> {
    let values: Vec<f64> = readings.iter().map(|r| r.power_watts).collect();
    let (ciphertext, encryption_ms) = provider.encrypt(&values)?;

    let batch = EncryptedBatch {
        meter_id,
        timestamp: unix_now(),
        ciphertext,
        encryption_time_ms: encryption_ms,
        scheme: SCHEME_CKKS.to_string(),
        count: readings.len() as u32,
    };
    let frame = wire::encode_frame(&batch)?;

    let start = Instant::now();
    let mut stream = TcpStream::connect_timeout(&server_addr, send_timeout)?;
    stream.set_read_timeout(Some(send_timeout))?;
    stream.set_write_timeout(Some(send_timeout))?;
    stream.write_all(&frame)?;

    let mut ack = [0u8; 8];
    let n = stream.read(&mut ack)?;
    if &ack[..n] != wire::ACK {
        return Err(MeterError::BadAck);
    }
    let transmission_ms = start.elapsed().as_secs_f64() * 1000.0;

    let mut timings = shared.timings.lock().unwrap();
    timings.encryption.record_ms(encryption_ms);
    timings.transmission.record_ms(transmission_ms);
    drop(timings);
    shared.batches_sent.fetch_add(1, Relaxed);

    Ok((encryption_ms, transmission_ms))
}
