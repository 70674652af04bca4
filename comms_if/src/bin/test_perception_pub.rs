//! Simulated perception service, publishes a single target moving across the image.

use chrono::Utc;
use comms_if::{
    channel::{MessageChannel, ZmqChannel},
    eqpt::perception::{DetectionBatch, DetectionRecord},
    frame,
    net::{zmq, NetParams},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {

    let params = NetParams::default();
    let ctx = zmq::Context::new();

    let mut chan = ZmqChannel::publisher("perception", &ctx, &params.perception_endpoint)?;

    println!("Perception publisher bound to {}", params.perception_endpoint);

    let mut frame_index = 0u64;

    loop {
        // Sweep the target left and right, growing as it sweeps
        let phase = (frame_index as f64) * 0.05;
        let x = 640.0 + 300.0 * phase.sin();
        let h = 150.0 + 50.0 * phase.cos();

        let batch = DetectionBatch {
            frame_index,
            timestamp: Utc::now(),
            detections: vec![DetectionRecord::boxed(x, 360.0, h * 0.5, h, 0.9)],
        };

        match chan.send(&frame::encode(&params.perception_topic, &batch)?) {
            Ok(_) => (),
            Err(e) => println!("Failed to send batch {}: {}", frame_index, e)
        }

        frame_index += 1;
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
}
