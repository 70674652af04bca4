//! Follow executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Load the configuration, start the session and logging
//!     - Initialise all modules and start the messaging gateway
//!     - Main loop:
//!         - Detection batch acquisition (timer or frame driven)
//!         - Teleop chatter handling and configuration reload
//!         - Tracking
//!         - Follow control
//!         - Command publication and archiving
//!     - On Ctrl-C or SIGTERM, stop the loop and publish a final safe command
//!
//! # Modules
//!
//! All modules (e.g. `tracker`) shall meet the following requirements:
//!     1. Provide a public struct implementing the `util::module::State` trait.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use chrono::Utc;
use color_eyre::{eyre::WrapErr, Report};
use log::{debug, error, info, warn};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;

// Internal
use comms_if::{eqpt::control::ControlMsg, net::zmq};
use follow_lib::{
    config_store::ConfigStore,
    data_store::SafeModeCause,
    follow_loop::{CycleInput, FollowLoop},
    gateway::Gateway,
    params::{DriveMode, FollowExecParams},
};
use util::{
    archive::Archived,
    logger::{logger_init, parse_level},
    session::Session,
    time::std_duration_to_millis,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tracks the objects detected by the perception service and follows the selected target.
#[derive(Debug, StructOpt)]
#[structopt(name = "follow_exec")]
struct Opt {
    /// Path to the TOML configuration file
    #[structopt(parse(from_os_str))]
    config_path: PathBuf,

    /// Minimum level of the log messages, one of trace, debug or info
    #[structopt(long, default_value = "info")]
    log_level: String,

    /// Directory in which to create the session, overrides `exec.session_root`
    #[structopt(long, parse(from_os_str))]
    session_root: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    let level = parse_level(&opt.log_level)
        .wrap_err("Invalid log level")?;

    // The configuration is needed before the session as it holds the session root
    let config = ConfigStore::load(&opt.config_path)
        .wrap_err_with(|| format!("Could not load the configuration from {:?}", opt.config_path))?;
    let params = config.snapshot()?;

    let session_root = opt.session_root
        .clone()
        .unwrap_or_else(|| params.exec.session_root.clone());

    // Initialise session
    let session = Session::new("follow_exec", &session_root)
        .wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(level, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Follow Executable\n");
    info!("Session directory: {:?}", session.session_root);
    info!("Configuration loaded from {:?}\n", opt.config_path);

    session.save_json("params.json", &*params)
        .wrap_err("Could not save the parameters to the session")?;

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let mut follow_loop = FollowLoop::new(params.clone())
        .wrap_err("Failed to initialise the modules")?;

    follow_loop.data_store_mut()
        .open_archives(&session)
        .wrap_err("Failed to open the archives")?;

    info!("Module initialisation complete\n");

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    let gateway = Gateway::zmq(&zmq_ctx, &params.net, &params.gateway)
        .wrap_err("Failed to start the gateway")?;

    info!("Network initialisation complete");

    // ---- SIGNAL HANDLING ----

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .wrap_err("Failed to set the termination handler")?;
    }

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut last_cycle_instant = Instant::now();
    let mut last_reload_poll = Instant::now();

    // Set after an overrun in frame driven mode, the backlog is skipped on the next cycle
    let mut skip_backlog = false;

    while running.load(Ordering::SeqCst) {

        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // One snapshot for the whole cycle
        let params = follow_loop.params().clone();

        // ---- DATA INPUT ----

        let (frame, stale) = match (params.exec.drive_mode, skip_backlog) {
            (DriveMode::Timer, _) | (DriveMode::Frame, true) => gateway.latest_detections(),
            (DriveMode::Frame, false) => (
                gateway.recv_detections_timeout(
                    Duration::from_secs_f64(params.exec.inbound_timeout_s)
                ),
                0
            )
        };
        skip_backlog = false;

        if stale > 0 {
            debug!("{} stale detection batch(es) skipped", stale);
            follow_loop.data_store_mut().num_stale_batches += stale as u64;
        }

        let input_instant = Instant::now();
        let dt = input_instant.duration_since(last_cycle_instant).as_secs_f64();
        last_cycle_instant = input_instant;

        // ---- CHATTER ----

        let mut reload_requested = false;
        while let Some(chatter) = gateway.try_recv_chatter() {
            reload_requested |= follow_loop.handle_chatter(chatter);
        }

        // ---- CONFIGURATION RELOAD ----

        let mut new_params = None;

        if reload_requested {
            match config.reload() {
                Ok(p) => new_params = Some(p),
                Err(e) => warn!("Reload requested but rejected: {}", e)
            }
        }
        else if last_reload_poll.elapsed().as_secs_f64() >= params.exec.reload_poll_s {
            last_reload_poll = Instant::now();
            match config.poll_modified() {
                Ok(p) => new_params = p,
                Err(e) => warn!("Modified configuration rejected: {}", e)
            }
        }

        if let Some(p) = new_params {
            warn_restart_only(&params, &p);
            if let Err(e) = session.save_json_with_timestamp("params.json", &*p) {
                warn!("Could not save the reloaded parameters: {}", e);
            }
            follow_loop.apply_config(p);
        }

        // ---- PROCESSING ----

        let input = CycleInput {
            detections: frame.map(|f| f.detections),
            dt,
            degraded: gateway.is_degraded(),
            time: Utc::now(),
        };

        match follow_loop.step(input) {
            Ok(output) => {
                for event in output.events.iter() {
                    debug!("Track event: {:?}", event);
                }
                gateway.send_command(output.msg);
            },
            Err(e) => {
                error!("Error during cycle processing: {}", e);
                gateway.send_command(ControlMsg {
                    degraded: gateway.is_degraded(),
                    ..ControlMsg::safe(Utc::now())
                });
            }
        }

        // ---- WRITE ARCHIVES ----

        {
            let ds = follow_loop.data_store_mut();
            ds.gateway_status_rpt = gateway.status();
            if let Err(e) = ds.write() {
                warn!("Could not write archives: {}", e);
            }
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;
        let budget = Duration::from_secs_f64(params.exec.watchdog_budget_s);
        let ds = follow_loop.data_store_mut();

        match params.exec.drive_mode {
            DriveMode::Timer => {
                let period_s = params.exec.cycle_period_s;

                match Duration::from_secs_f64(period_s).checked_sub(cycle_dur) {
                    Some(d) => {
                        ds.num_consec_cycle_overruns = 0;
                        thread::sleep(d);
                    },
                    None => {
                        warn!(
                            "Cycle overran by {:.03} ms",
                            std_duration_to_millis(cycle_dur) - period_s * 1000.0
                        );
                        ds.num_consec_cycle_overruns += 1;

                        // Skip the cycles the overrun ate into and realign on the period
                        if cycle_dur > budget {
                            let skipped = (cycle_dur.as_secs_f64() / period_s).floor() as u64;
                            ds.num_skipped_cycles += skipped;
                            warn!("Watchdog: skipping {} cycle(s)", skipped);

                            let into_period_s = cycle_dur.as_secs_f64() % period_s;
                            thread::sleep(Duration::from_secs_f64(period_s - into_period_s));
                        }
                    }
                }
            },
            DriveMode::Frame => {
                if cycle_dur > budget {
                    warn!(
                        "Watchdog: cycle took {:.03} ms, skipping queued batches",
                        std_duration_to_millis(cycle_dur)
                    );
                    ds.num_consec_cycle_overruns += 1;
                    skip_backlog = true;
                }
                else {
                    ds.num_consec_cycle_overruns = 0;
                }
            }
        }
    }

    // ---- SHUTDOWN ----

    info!("Termination requested, shutting down");

    follow_loop.make_safe(SafeModeCause::Shutdown);

    let final_msg = ControlMsg {
        degraded: gateway.is_degraded(),
        ..ControlMsg::safe(Utc::now())
    };

    let gateway_status = gateway.shutdown(final_msg)
        .wrap_err("Failed to stop the gateway")?;

    info!("Gateway status at shutdown: {:#?}", gateway_status);

    if let Err(e) = session.save_json("gateway_status.json", &gateway_status) {
        warn!("Could not save the gateway status: {}", e);
    }

    info!("End of execution");

    Ok(())
}

/// Warn about changes which only take effect on restart.
fn warn_restart_only(current: &FollowExecParams, new: &FollowExecParams) {
    if current.net != new.net || current.gateway != new.gateway {
        warn!("Changes to [net] and [gateway] only take effect after a restart");
    }
    if current.exec.session_root != new.exec.session_root {
        warn!("Changes to exec.session_root only take effect after a restart");
    }
}
