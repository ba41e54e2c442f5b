//! Integration tests for p3-bridge.
//!
//! These drive the full stack — a mock decoder socket on one side, a
//! scripted HTTP endpoint on the other — through the public API.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use p3_bridge::delivery::queue::{DrainOutcome, QueueEntry, RetryQueue};
use p3_bridge::delivery::Outcome;
use p3_bridge::protocol::{crc16, encode_frame, parse_payload, Framer};
use p3_bridge::{Bridge, Config, Mode};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Scripted HTTP/1.1 endpoint: one connection per status code, raw
/// requests recorded.
struct MockEndpoint {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockEndpoint {
    async fn start(statuses: Vec<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        let handle = tokio::spawn(async move {
            for status in statuses {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut sock).await;
                recorded.lock().unwrap().push(request);
                let reply = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = sock.write_all(reply.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    async fn finish(self) -> Vec<String> {
        self.handle.abort();
        let _ = self.handle.await;
        let requests = self.requests.lock().unwrap();
        requests.clone()
    }
}

async fn read_request(sock: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];

    let header_end = loop {
        let n = sock.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            return String::from_utf8_lossy(&buf).into_owned();
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let content_length = String::from_utf8_lossy(&buf[..header_end])
        .to_ascii_lowercase()
        .lines()
        .find_map(|line| line.strip_prefix("content-length:").map(str::to_owned))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = sock.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }

    String::from_utf8_lossy(&buf).into_owned()
}

/// Body of a recorded request, parsed as JSON.
fn body_json(request: &str) -> Value {
    let body_start = request.find("\r\n\r\n").unwrap() + 4;
    serde_json::from_str(&request[body_start..]).unwrap()
}

/// Build a framed payload: header + TLV body + valid CRC, escaped.
fn build_frame(version: u8, tor: u16, flags: u16, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![version];
    payload.extend(tor.to_le_bytes());
    payload.extend(flags.to_le_bytes());
    payload.extend_from_slice(body);
    let crc = crc16(&payload);
    payload.extend(crc.to_le_bytes());
    encode_frame(&payload)
}

fn tlv(tof: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![tof];
    out.extend((data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn bridge_config(decoder: SocketAddr, endpoint_url: &str, queue_file: &std::path::Path) -> Config {
    let json = json!({
        "post": {
            "enabled": true,
            "baseUrl": endpoint_url,
            "path": "/passings",
            "retries": 0,
            "retryDelayMs": 10,
            "queueFile": queue_file.to_string_lossy(),
        },
        "decoder": {
            "reconnect": {
                "baseDelayMs": 10,
                "maxDelayMs": 100,
                "backoffFactor": 1.5,
                "jitterRatio": 0.0,
                "connectTimeoutMs": 1000,
            }
        },
        "defaults": {
            "mode": "tcp",
            "tcpHost": decoder.ip().to_string(),
            "tcpPort": decoder.port(),
        }
    });
    serde_json::from_value(json).unwrap()
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

/// A passing record travels decoder → bridge → backend intact.
#[tokio::test]
async fn test_passing_record_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = MockEndpoint::start(vec![200]).await;

    let config = bridge_config(
        decoder.local_addr().unwrap(),
        &endpoint.base_url(),
        &dir.path().join("queue.json"),
    );
    let bridge = Bridge::start(config).await.unwrap();

    let (mut sock, _) = decoder.accept().await.unwrap();
    let mut body = tlv(0x01, &[0x2A, 0x00, 0x00, 0x00]); // passingNumber = 42
    body.extend(tlv(0x03, &[0xDE, 0xAD, 0xBE, 0xEF])); // transponder
    body.extend(tlv(0x05, &[0x64, 0x00])); // strength = 100
    sock.write_all(&build_frame(4, 0x0001, 0, &body))
        .await
        .unwrap();
    sock.flush().await.unwrap();

    wait_for("record POST", || endpoint.request_count() == 1).await;

    let snap = bridge.stats();
    assert_eq!(snap.msg_total, 1);
    assert_eq!(snap.msg_ok, 1);
    assert_eq!(snap.posted, 1);
    assert_eq!(bridge.queue_len().await, 0);

    bridge.shutdown().await.unwrap();

    let requests = endpoint.finish().await;
    let body = body_json(&requests[0]);
    assert_eq!(body["version"], 4);
    assert_eq!(body["tor"], 1);
    assert_eq!(body["torName"], "passing");
    assert_eq!(body["crcOk"], true);
    assert_eq!(body["decoded"]["passingNumber"], 42);
    assert_eq!(body["decoded"]["transponder"], "deadbeef");
    assert_eq!(body["decoded"]["strength"], 100);
    assert!(body["receivedAt"].as_str().unwrap().ends_with('Z'));
}

/// A CRC mismatch does not suppress the record; it arrives flagged.
#[tokio::test]
async fn test_crc_mismatch_still_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = MockEndpoint::start(vec![200]).await;

    let config = bridge_config(
        decoder.local_addr().unwrap(),
        &endpoint.base_url(),
        &dir.path().join("queue.json"),
    );
    let bridge = Bridge::start(config).await.unwrap();

    let (mut sock, _) = decoder.accept().await.unwrap();
    // Valid frame, then zero out the CRC bytes before escaping.
    let mut payload = vec![0x04, 0x01, 0x00, 0x00, 0x00];
    payload.extend(tlv(0x01, &[0x01]));
    payload.extend([0x00, 0x00]);
    sock.write_all(&encode_frame(&payload)).await.unwrap();

    wait_for("flagged POST", || endpoint.request_count() == 1).await;

    let snap = bridge.stats();
    assert_eq!(snap.msg_total, 1);
    assert_eq!(snap.msg_crc_errors, 1);
    assert_eq!(snap.msg_ok, 0);

    bridge.shutdown().await.unwrap();

    let requests = endpoint.finish().await;
    let body = body_json(&requests[0]);
    assert_eq!(body["crcOk"], false);
    assert_eq!(body["decoded"]["passingNumber"], 1);
}

/// Byte-stuffing round trip: field data containing the framing bytes
/// survives escape → wire → unescape → parse.
#[tokio::test]
async fn test_byte_stuffing_round_trip() {
    let sensitive = [0x01, 0x04, 0x10];
    let mut payload = vec![0x04, 0x01, 0x00, 0x00, 0x00];
    payload.extend(tlv(0x40, &sensitive));
    let crc = crc16(&payload);
    payload.extend(crc.to_le_bytes());

    let wire = encode_frame(&payload);
    // Every sensitive byte was escaped on the wire.
    assert!(wire.len() > payload.len() + 2);

    let mut framer = Framer::new();
    let out = framer.push(&wire);
    assert_eq!(out.frames.len(), 1);

    let record = parse_payload(&out.frames[0]).unwrap();
    assert!(record.crc.ok);
    assert_eq!(record.fields[0].raw, sensitive);
    assert_eq!(record.fields[0].data_hex(), "010410");
}

/// The bridge reconnects after the decoder drops the link, and frames
/// split across TCP segments still come out whole.
#[tokio::test]
async fn test_reconnect_and_split_frames() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = MockEndpoint::start(vec![200, 200]).await;

    let config = bridge_config(
        decoder.local_addr().unwrap(),
        &endpoint.base_url(),
        &dir.path().join("queue.json"),
    );
    let bridge = Bridge::start(config).await.unwrap();

    // Session one: a frame sent one byte at a time, then a hard drop.
    let (mut sock, _) = decoder.accept().await.unwrap();
    let frame = build_frame(4, 0x0001, 0, &tlv(0x01, &[0x01, 0x00, 0x00, 0x00]));
    for byte in &frame {
        sock.write_all(std::slice::from_ref(byte)).await.unwrap();
        sock.flush().await.unwrap();
    }
    wait_for("first POST", || endpoint.request_count() == 1).await;
    drop(sock);

    // Session two: the supervisor reconnects on its own.
    let (mut sock, _) = decoder.accept().await.unwrap();
    sock.write_all(&build_frame(4, 0x0001, 0, &tlv(0x01, &[0x02, 0x00, 0x00, 0x00])))
        .await
        .unwrap();
    wait_for("second POST", || endpoint.request_count() == 2).await;

    let snap = bridge.stats();
    assert_eq!(snap.connects, 2);
    assert_eq!(snap.msg_total, 2);

    bridge.shutdown().await.unwrap();

    let requests = endpoint.finish().await;
    assert_eq!(body_json(&requests[0])["decoded"]["passingNumber"], 1);
    assert_eq!(body_json(&requests[1])["decoded"]["passingNumber"], 2);
}

/// A dead endpoint sends records to the queue; once the endpoint returns,
/// the backlog replays in FIFO order after the next inline success.
#[tokio::test]
async fn test_backlog_replays_after_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let queue_file = dir.path().join("queue.json");
    let decoder = TcpListener::bind("127.0.0.1:0").await.unwrap();

    // Endpoint answers 500 to the first record, then recovers: the second
    // record succeeds inline and its drain replays the first.
    let endpoint = MockEndpoint::start(vec![500, 200, 200]).await;

    let config = bridge_config(decoder.local_addr().unwrap(), &endpoint.base_url(), &queue_file);
    let bridge = Bridge::start(config).await.unwrap();

    let (mut sock, _) = decoder.accept().await.unwrap();
    sock.write_all(&build_frame(4, 0x0001, 0, &tlv(0x01, &[0x01, 0x00, 0x00, 0x00])))
        .await
        .unwrap();
    wait_for("record enqueued", || endpoint.request_count() == 1).await;

    sock.write_all(&build_frame(4, 0x0001, 0, &tlv(0x01, &[0x02, 0x00, 0x00, 0x00])))
        .await
        .unwrap();
    wait_for("inline success plus replay", || endpoint.request_count() == 3).await;
    wait_for("backlog drained", || bridge.stats().drained == 1).await;

    assert_eq!(bridge.queue_len().await, 0);
    let snap = bridge.stats();
    assert_eq!(snap.post_failures, 1);
    assert_eq!(snap.drained, 1);

    bridge.shutdown().await.unwrap();

    let requests = endpoint.finish().await;
    // Request order: failed #1, inline #2, replayed #1.
    assert_eq!(body_json(&requests[1])["decoded"]["passingNumber"], 2);
    assert_eq!(body_json(&requests[2])["decoded"]["passingNumber"], 1);
}

/// Queue durability across a simulated restart, with a head failure
/// aborting the drain (entries after the failed head stay put).
#[tokio::test]
async fn test_queue_durability_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");

    let make_entry = |n: u64| {
        QueueEntry::new(
            "POST".to_string(),
            "http://127.0.0.1:9/passings".to_string(),
            BTreeMap::new(),
            json!({ "n": n }),
            "HTTP 500".to_string(),
        )
    };

    {
        let queue = RetryQueue::load(&path);
        for n in 1..=3 {
            queue.enqueue(make_entry(n)).await.unwrap();
        }
    }

    // Process restart: reload from disk, then drain with a stub that
    // accepts entries 1 and 3 but rejects entry 2.
    let queue = RetryQueue::load(&path);
    assert_eq!(queue.len().await, 3);

    let outcome = queue
        .drain_with(5, |entry| async move {
            match entry.payload["n"].as_u64().unwrap() {
                2 => Outcome::Retryable("HTTP 503".to_string()),
                _ => Outcome::Delivered,
            }
        })
        .await;

    assert_eq!(
        outcome,
        DrainOutcome::Completed {
            delivered: 1,
            remaining: 2
        }
    );

    // Another restart: entry 2 kept its failure bookkeeping, entry 3 was
    // never attempted.
    let reloaded = RetryQueue::load(&path);
    assert_eq!(reloaded.len().await, 2);
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    reloaded
        .drain_with(5, move |entry| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push((
                    entry.payload["n"].as_u64().unwrap(),
                    entry.attempts,
                    entry.last_error.clone(),
                ));
                Outcome::Delivered
            }
        })
        .await;

    let seen = order.lock().unwrap();
    assert_eq!(seen[0].0, 2);
    assert!(seen[0].1 >= 1);
    assert_eq!(seen[0].2.as_deref(), Some("HTTP 503"));
    assert_eq!(seen[1].0, 3);
    assert_eq!(seen[1].1, 0);
}

/// UDP mode: datagrams parse and deliver like the TCP stream.
#[tokio::test]
async fn test_udp_mode_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = MockEndpoint::start(vec![200]).await;

    // Bind an ephemeral UDP port first so the test knows where to send.
    let probe = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config: Config = serde_json::from_value(json!({
        "post": {
            "enabled": true,
            "baseUrl": endpoint.base_url(),
            "retries": 0,
            "queueFile": dir.path().join("queue.json").to_string_lossy(),
        },
        "defaults": { "mode": "udp", "udpListenPort": port }
    }))
    .unwrap();
    assert_eq!(config.defaults.mode, Mode::Udp);

    let bridge = Bridge::start(config).await.unwrap();

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frame = build_frame(4, 0x0001, 0, &tlv(0x01, &[0x07, 0x00, 0x00, 0x00]));
    sender
        .send_to(&frame, ("127.0.0.1", port))
        .await
        .unwrap();

    wait_for("datagram POST", || endpoint.request_count() == 1).await;
    bridge.shutdown().await.unwrap();

    let requests = endpoint.finish().await;
    assert_eq!(body_json(&requests[0])["decoded"]["passingNumber"], 7);
}
