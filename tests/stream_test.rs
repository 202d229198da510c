//! End-to-end streaming over a loopback WebSocket: a real source node fed by
//! a synthetic capture source, a real sink node collecting playback writes.

use crossbeam::channel::Sender;
use roomcast::audio::{ChannelCapture, CollectingSink};
use roomcast::client::{CastClient, ClientConfig};
use roomcast::config::StreamParams;
use roomcast::server::{CastServer, ServerConfig, ServerHandle};
use roomcast::CastError;
use std::thread;
use std::time::{Duration, Instant};

const FRAME_BYTES: usize = 3840;

fn frame_bytes(index: u64) -> Vec<u8> {
    let mut data = vec![(index % 251) as u8; FRAME_BYTES];
    data[..8].copy_from_slice(&index.to_le_bytes());
    data
}

fn frame_index(data: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[..8]);
    u64::from_le_bytes(raw)
}

fn start_server(params: StreamParams) -> (ServerHandle, String, Sender<Vec<u8>>) {
    let (feed, capture) = ChannelCapture::pair(16);
    let server = CastServer::bind(ServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        params,
    })
    .expect("bind");
    let addr = server.local_addr().expect("local addr");
    let handle = server.handle();

    thread::spawn(move || {
        let _ = server.run(Box::new(capture));
    });

    (handle, format!("ws://{}", addr), feed)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn feed_frames(feed: &Sender<Vec<u8>>, range: std::ops::Range<u64>) {
    for index in range {
        feed.send(frame_bytes(index)).expect("feed frame");
        // Light pacing keeps the per-sink queues comfortably below depth.
        if index % 2 == 1 {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[test]
fn clean_stream_reaches_one_sink_in_order() {
    let params = StreamParams::default();
    let (handle, url, feed) = start_server(params);

    let sink = CollectingSink::new();
    let client = CastClient::connect(
        ClientConfig {
            url,
            client_id: "test-sink".to_string(),
            ..ClientConfig::default()
        },
        Box::new(sink.clone()),
    )
    .expect("connect");

    assert!(
        wait_until(Duration::from_secs(5), || handle.ready_count() == 1),
        "sink never became ready"
    );

    feed_frames(&feed, 0..100);

    // The session stays open while buffered frames reach their deadlines.
    assert!(
        wait_until(Duration::from_secs(10), || sink.blocks().len() == 100),
        "only {} of 100 frames played",
        sink.blocks().len()
    );

    let blocks = sink.blocks();
    for (position, block) in blocks.iter().enumerate() {
        assert_eq!(block.len(), FRAME_BYTES);
        assert_eq!(frame_index(block), position as u64, "out of order playback");
    }

    let stats = client.stats();
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.late, 0);
    assert_eq!(stats.received, 100);

    client.stop();
    handle.stop();
    drop(feed);
    let _ = client.join();
}

#[test]
fn late_joining_sink_sees_monotone_sequence() {
    let params = StreamParams::default();
    let (handle, url, feed) = start_server(params);

    // Stream before any sink exists; sequence advances regardless.
    feed_frames(&feed, 0..50);
    // Let the pump drain its queue so every pre-join frame is stamped.
    thread::sleep(Duration::from_millis(100));

    let sink = CollectingSink::new();
    let client = CastClient::connect(
        ClientConfig {
            url,
            client_id: "late-sink".to_string(),
            ..ClientConfig::default()
        },
        Box::new(sink.clone()),
    )
    .expect("connect");

    assert!(
        wait_until(Duration::from_secs(5), || handle.ready_count() == 1),
        "sink never became ready"
    );

    feed_frames(&feed, 50..70);

    assert!(
        wait_until(Duration::from_secs(10), || sink.blocks().len() >= 20),
        "only {} frames played",
        sink.blocks().len()
    );

    let indices: Vec<u64> = sink.blocks().iter().map(|b| frame_index(b)).collect();
    assert!(
        indices[0] >= 50,
        "late joiner saw pre-join frame {}",
        indices[0]
    );
    for pair in indices.windows(2) {
        assert!(pair[0] < pair[1], "sequence rewound: {:?}", pair);
    }

    client.stop();
    handle.stop();
    drop(feed);
    let _ = client.join();
}

#[test]
fn mismatched_stream_parameters_close_the_session() {
    let mut params = StreamParams::default();
    params.sample_rate = 44_100;
    let (handle, url, _feed) = start_server(params);

    let sink = CollectingSink::new();
    let client = CastClient::connect(
        ClientConfig {
            url,
            client_id: "picky-sink".to_string(),
            ..ClientConfig::default()
        },
        Box::new(sink.clone()),
    )
    .expect("connect");

    let result = client.join();
    match result {
        Err(CastError::ProtocolMismatch(_)) => {}
        other => panic!("expected protocol mismatch, got {:?}", other.err()),
    }
    assert!(sink.blocks().is_empty());
    handle.stop();
}
