//! The gateway running over in-memory channels.

use chrono::{TimeZone, Utc};
use comms_if::{
    channel::{MemoryChannel, MessageChannel},
    eqpt::{
        control::ControlMsg,
        perception::{DetectionBatch, DetectionRecord},
    },
    frame,
    net::NetParams,
    tc::Chatter,
};
use std::{
    thread,
    time::{Duration, Instant},
};

use follow_lib::gateway::{Gateway, GatewayParams};

const TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    gateway: Gateway,
    perception: MemoryChannel,
    chatter: MemoryChannel,
    control: MemoryChannel,
    net: NetParams,
}

fn harness(params: GatewayParams) -> Harness {
    let net = NetParams::default();

    let (perception_gw, perception) = MemoryChannel::pair("perception", "perception_src");
    let (chatter_gw, chatter) = MemoryChannel::pair("chatter", "chatter_src");
    let (control_gw, control) = MemoryChannel::pair("control", "vehicle");

    let gateway = Gateway::start(
        Box::new(perception_gw.with_topics(&[net.perception_topic.as_str()])),
        Some(Box::new(chatter_gw.with_topics(&[net.chatter_topic.as_str()]))),
        Box::new(control_gw),
        &net,
        &params
    ).unwrap();

    Harness { gateway, perception, chatter, control, net }
}

/// Receive frames until `n` have arrived or the timeout elapses.
fn receive_n(chan: &mut MemoryChannel, n: usize) -> Vec<String> {
    let start = Instant::now();
    let mut frames = Vec::new();

    while frames.len() < n && start.elapsed() < TIMEOUT {
        match chan.try_receive().unwrap() {
            Some(f) => frames.push(f),
            None => thread::sleep(Duration::from_millis(1))
        }
    }

    frames
}

fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        if cond() {
            return true
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn batch(frame_index: u64) -> DetectionBatch {
    DetectionBatch {
        frame_index,
        timestamp: Utc.timestamp_millis(1_600_000_000_000),
        detections: vec![
            DetectionRecord::boxed(100.0, 50.0, 20.0, 40.0, 0.9),
            DetectionRecord::point(400.0, 300.0, 1.5),
        ],
    }
}

#[test]
fn detections_decoded_and_validated() {
    let mut h = harness(GatewayParams::default());

    let f = frame::encode(&h.net.perception_topic, &batch(7)).unwrap();
    h.perception.send(&f).unwrap();

    let got = h.gateway.recv_detections_timeout(TIMEOUT).unwrap();
    assert_eq!(got.frame_index, 7);
    assert_eq!(got.detections.len(), 1);
    assert_eq!(got.rejected, 1);
    assert_eq!(got.detections[0].frame_index(), 7);

    // Malformed frames are dropped and counted
    h.perception.send(&format!("{} {{not json", h.net.perception_topic)).unwrap();
    h.perception.send(&format!("{} {{\"frame_index\": 1}}", h.net.perception_topic)).unwrap();
    assert!(wait_for(|| h.gateway.status().decode_errors == 2));

    let status = h.gateway.status();
    assert_eq!(status.batches_received, 1);
    assert_eq!(status.rejected_detections, 1);
    assert!(h.gateway.recv_detections_timeout(Duration::from_millis(20)).is_none());
}

#[test]
fn out_of_range_detections_rejected() {
    let mut h = harness(GatewayParams::default());

    let b = DetectionBatch {
        frame_index: 3,
        timestamp: Utc.timestamp_millis(1_600_000_000_000),
        detections: vec![
            DetectionRecord::point(1e160, 50.0, 0.9),
            DetectionRecord::boxed(100.0, 50.0, 20.0, 1e5, 0.9),
            DetectionRecord::point(640.0, 400.0, 0.9),
        ],
    };
    h.perception.send(&frame::encode(&h.net.perception_topic, &b).unwrap()).unwrap();

    let got = h.gateway.recv_detections_timeout(TIMEOUT).unwrap();
    assert_eq!(got.rejected, 2);
    assert_eq!(got.detections.len(), 1);
    assert_eq!(got.detections[0].position().x, 640.0);
    assert_eq!(h.gateway.status().rejected_detections, 2);
}

#[test]
fn latest_batch_supersedes_older() {
    let mut h = harness(GatewayParams { inbound_queue_len: 3, ..Default::default() });

    for i in 0..5 {
        let f = frame::encode(&h.net.perception_topic, &batch(i)).unwrap();
        h.perception.send(&f).unwrap();
    }
    assert!(wait_for(|| h.gateway.status().batches_received == 5));

    let (latest, stale) = h.gateway.latest_detections();
    assert_eq!(latest.unwrap().frame_index, 4);
    assert_eq!(stale, 2);
    assert_eq!(h.gateway.status().dropped_inbound, 2);
}

#[test]
fn chatter_forwarded() {
    let mut h = harness(GatewayParams::default());
    let topic = h.net.chatter_topic.clone();

    h.chatter.send(&format!("{} {{\"following\": \"Stop Following\"}}", topic)).unwrap();
    h.chatter.send(&format!("{} {{\"other\": 1}}", topic)).unwrap();
    h.chatter.send(&format!("{} {{\"command\": \"restart\"}}", topic)).unwrap();

    let start = Instant::now();
    let mut got = Vec::new();
    while got.len() < 2 && start.elapsed() < TIMEOUT {
        match h.gateway.try_recv_chatter() {
            Some(c) => got.push(c),
            None => thread::sleep(Duration::from_millis(1))
        }
    }

    assert_eq!(got, vec![Chatter::StopFollowing, Chatter::Restart]);
}

#[test]
fn commands_published_and_mirrored() {
    let mut h = harness(GatewayParams::default());

    let msg = ControlMsg {
        steering: 0.25,
        throttle: 0.1,
        valid: true,
        degraded: false,
        mode: "Tracking".into(),
        time: Utc.timestamp_millis(1_600_000_000_000),
    };
    h.gateway.send_command(msg.clone());

    let frames = receive_n(&mut h.control, 2);
    assert_eq!(frames.len(), 2);

    let (topic_a, a): (&str, ControlMsg) = frame::decode(&frames[0]).unwrap();
    let (topic_b, b): (&str, ControlMsg) = frame::decode(&frames[1]).unwrap();
    assert_eq!(topic_a, h.net.control_topic);
    assert_eq!(topic_b, h.net.pilot_topic);
    assert_eq!(a, msg);
    assert_eq!(b, msg);

    let status = h.gateway.shutdown(ControlMsg::safe(Utc.timestamp_millis(0))).unwrap();
    assert_eq!(status.commands_sent, 2);

    // The final command goes out on both topics as well
    let frames = receive_n(&mut h.control, 2);
    assert_eq!(frames.len(), 2);
    let (_, last): (&str, ControlMsg) = frame::decode(&frames[1]).unwrap();
    assert!(last.is_safe());
}

#[test]
fn link_loss_degrades_then_recovers() {
    let mut h = harness(GatewayParams {
        backoff_initial_s: 0.005,
        backoff_max_s: 0.02,
        degraded_after_s: 0.05,
        outbound_queue_len: 2,
        ..Default::default()
    });

    let link = h.control.link();
    link.set_up(false);

    assert!(wait_for(|| h.gateway.is_degraded()));
    assert!(link.reconnect_attempts() > 0);

    // Commands queue up while the link is down, only the newest survive
    for i in 0..5 {
        h.gateway.send_command(ControlMsg {
            throttle: i as f64 * 0.1,
            ..ControlMsg::safe(Utc.timestamp_millis(0))
        });
    }
    assert_eq!(h.gateway.status().dropped_outbound, 3);

    link.set_up(true);
    assert!(wait_for(|| !h.gateway.is_degraded()));

    let frames = receive_n(&mut h.control, 4);
    assert_eq!(frames.len(), 4);
    let (_, newest): (&str, ControlMsg) = frame::decode(&frames[3]).unwrap();
    assert!((newest.throttle - 0.4).abs() < 1e-12);

    let status = h.gateway.status();
    assert!(status.reconnects > 0);
    assert!(status.control_connected);
}
