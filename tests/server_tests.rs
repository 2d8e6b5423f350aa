use cryptogrid::config::{ProviderParams, ServerConfig};
use cryptogrid::data::{EncryptedBatch, SCHEME_CKKS};
use cryptogrid::provider::{HomomorphicProvider, SimCkksProvider};
use cryptogrid::server::{AnalyticsServer, ServerState};
use cryptogrid::wire;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

fn start_server() -> AnalyticsServer {
    let mut server = AnalyticsServer::new(ServerConfig {
        port: 0, // let the OS pick
        read_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    });
    server.start().unwrap();
    server
}

fn make_frame(provider: &dyn HomomorphicProvider, meter_id: u64, values: &[f64], ts: f64) -> Vec<u8> {
    let (ciphertext, encryption_time_ms) = provider.encrypt(values).unwrap();
    wire::encode_frame(&EncryptedBatch {
        meter_id,
        timestamp: ts,
        ciphertext,
        encryption_time_ms,
        scheme: SCHEME_CKKS.to_string(),
        count: values.len() as u32,
    })
    .unwrap()
}

fn send_frame(addr: SocketAddr, frame: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(frame).unwrap();
    let mut response = Vec::new();
    // Server either answers ACK then closes, or closes with nothing.
    let _ = stream.read_to_end(&mut response);
    response
}

/// Polls until the server has accounted for `expected` readings.
fn await_readings(server: &AnalyticsServer, expected: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while server.statistics().total_readings_received < expected {
        assert!(Instant::now() < deadline, "timed out waiting for ingestion");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn accepted_batch_is_acked_and_counted() {
    let mut server = start_server();
    let addr = server.local_addr().unwrap();
    let provider = SimCkksProvider::with_seed(ProviderParams::default(), 11);

    let frame = make_frame(&provider, 7, &[100.0, 200.0, 300.0], 1.0);
    let response = send_frame(addr, &frame);
    assert_eq!(response, wire::ACK);

    await_readings(&server, 3);
    let stats = server.statistics();
    assert_eq!(stats.active_meters, 1);
    assert_eq!(stats.total_readings_received, 3);
    assert_eq!(stats.total_bytes_received, frame.len() as u64);

    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn malformed_frame_gets_no_ack_and_no_store_mutation() {
    let mut server = start_server();
    let addr = server.local_addr().unwrap();

    let response = send_frame(addr, b"this is not json\n");
    assert!(response.is_empty(), "malformed frame must not be acked");

    // Give any erroneous ingestion a moment to land before checking.
    thread::sleep(Duration::from_millis(100));
    let stats = server.statistics();
    assert_eq!(stats.total_readings_received, 0);
    assert_eq!(stats.active_meters, 0);
    server.stop();
}

#[test]
fn zero_count_frame_is_rejected() {
    let mut server = start_server();
    let addr = server.local_addr().unwrap();

    let frame = b"{\"meter_id\":1,\"timestamp\":1.0,\"ciphertext\":\"ab\",\
                   \"encryption_time_ms\":0.1,\"scheme\":\"CKKS\",\"encrypted_count\":0}\n";
    let response = send_frame(addr, frame);
    assert!(response.is_empty());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.statistics().total_readings_received, 0);
    server.stop();
}

#[test]
fn empty_connection_is_ignored() {
    let mut server = start_server();
    let addr = server.local_addr().unwrap();

    // Connect and immediately close without sending a frame.
    drop(TcpStream::connect(addr).unwrap());
    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.statistics().total_readings_received, 0);
    server.stop();
}

#[test]
fn concurrent_senders_are_counted_exactly_once_each() {
    const METERS: u64 = 4;
    const BATCHES: u64 = 5;
    const BATCH_SIZE: usize = 3;

    let mut server = start_server();
    let addr = server.local_addr().unwrap();
    let provider = SimCkksProvider::with_seed(ProviderParams::default(), 12);
    let context = provider.serialize_context();

    let handles: Vec<_> = (0..METERS)
        .map(|meter_id| {
            let context = context.clone();
            thread::spawn(move || {
                let provider =
                    SimCkksProvider::from_context(ProviderParams::default(), &context).unwrap();
                for batch_idx in 0..BATCHES {
                    let values = vec![meter_id as f64 + 1.0; BATCH_SIZE];
                    let frame = make_frame(&provider, meter_id, &values, batch_idx as f64);
                    let response = send_frame(addr, &frame);
                    assert_eq!(response, wire::ACK);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    await_readings(&server, METERS * BATCHES * BATCH_SIZE as u64);
    let stats = server.statistics();
    assert_eq!(
        stats.total_readings_received,
        METERS * BATCHES * BATCH_SIZE as u64
    );
    assert_eq!(stats.active_meters, METERS as usize);

    // Per-meter sequences are complete and in send (FIFO) order.
    let store = server.store_handle();
    let store = store.lock().unwrap();
    for meter_id in 0..METERS {
        let sequence = store.meter_sequence(meter_id).unwrap();
        assert_eq!(sequence.len(), BATCHES as usize);
        let timestamps: Vec<f64> = sequence.iter().map(|b| b.timestamp).collect();
        assert!(
            timestamps.windows(2).all(|w| w[0] <= w[1]),
            "meter {meter_id} sequence out of order: {timestamps:?}"
        );
    }
    drop(store);
    server.stop();
}

#[test]
fn double_start_is_rejected_and_stop_is_idempotent() {
    let mut server = start_server();
    assert!(server.start().is_err());
    server.stop();
    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
}
