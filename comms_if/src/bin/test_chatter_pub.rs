//! Sends a teleop chatter request, e.g. `test_chatter_pub start`.

use comms_if::{
    channel::{MessageChannel, ZmqChannel},
    frame,
    net::{zmq, NetParams},
    tc::ChatterRequest,
};
use structopt::StructOpt;

fn main() -> Result<(), Box<dyn std::error::Error>> {

    let request = ChatterRequest::from_args().to_json();

    let params = NetParams::default();
    let ctx = zmq::Context::new();

    let mut chan = ZmqChannel::publisher("chatter", &ctx, &params.chatter_endpoint)?;

    // Give subscribers time to connect, pub/sub drops anything sent before then
    std::thread::sleep(std::time::Duration::from_millis(500));

    chan.send(&frame::encode(&params.chatter_topic, &request)?)?;
    println!("Sent {}", request);

    std::thread::sleep(std::time::Duration::from_millis(100));

    Ok(())
}
