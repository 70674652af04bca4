//! Prints the control commands published by the follow executable.

use comms_if::{
    channel::{MessageChannel, ZmqChannel},
    eqpt::control::ControlMsg,
    frame,
    net::{zmq, NetParams},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {

    let params = NetParams::default();
    let ctx = zmq::Context::new();

    let mut chan = ZmqChannel::subscriber(
        "control",
        &ctx,
        &params.control_endpoint,
        &[params.control_topic.as_str(), params.pilot_topic.as_str()]
    )?;

    loop {
        while let Some(f) = chan.try_receive()? {
            match frame::decode::<ControlMsg>(&f) {
                Ok((topic, cmd)) => println!(
                    "{:>24} [{:>9}] steer: {:+.3}, throttle: {:+.3}, valid: {}, degraded: {}",
                    topic, cmd.mode, cmd.steering, cmd.throttle, cmd.valid, cmd.degraded
                ),
                Err(e) => println!("Invalid frame: {}", e)
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}
