pub mod config;
pub mod coordinator;
pub mod datalog_writer;
pub mod error;
pub mod inverter;
pub mod options;
pub mod persistence;
pub mod prelude;
pub mod scheduler;
pub mod telemetry;
pub mod zigbee;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use crate::coordinator::Coordinator;
use crate::datalog_writer::DatalogWriter;
use crate::options::Options;
use crate::persistence::JsonFileStore;
use crate::scheduler::{DayRollover, HostRequest, PollScheduler, RequestQueue};
use crate::telemetry::LogSink;
use crate::zigbee::transport::{
    ModemControlLine, NoResetLine, ResetLine, ResetSignal, SerialTransport,
};

use std::io::Write;
use std::time::Duration;

pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(err) = result {
        eprintln!("logger already initialised: {}", err);
    }
}

fn open_reset_line(
    config: &Config,
    transport: &SerialTransport,
) -> Result<Box<dyn ResetLine + Send>> {
    let line: Box<dyn ResetLine + Send> = match config.reset_line() {
        ResetSignal::None => Box::new(NoResetLine),
        signal => Box::new(ModemControlLine::new(transport.try_clone_port()?, signal)),
    };
    Ok(line)
}

/// Requests to issue once the engine first goes idle.
fn startup_requests(options: &Options, config: &Config) -> RequestQueue {
    let mut requests = RequestQueue::new();

    if config.auto_pair() && config.inverters.iter().any(|inv| inv.pair_id().is_none()) {
        requests.push(HostRequest::Pair(coordinator::WILDCARD.to_string()));
    }
    if let Some(serial) = &options.pair {
        requests.push(HostRequest::Pair(serial.clone()));
    }
    if let Some(serial) = &options.reboot {
        requests.push(HostRequest::Reboot(serial.clone()));
    }
    if let Some(serial) = &options.poll {
        requests.push(HostRequest::Poll(serial.clone()));
    }

    requests
}

async fn until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

pub async fn app(options: Options) -> Result<()> {
    let config = Config::new(options.config_file.clone())?;

    init_logging(config.loglevel());
    info!("apsystems-bridge {} starting", CARGO_PKG_VERSION);
    config.log_summary();

    let transport = SerialTransport::open(config.serial_port(), config.baud_rate())?;
    let reset = open_reset_line(&config, &transport)?;

    let mut coordinator =
        Coordinator::new(transport, reset, config.build_inverters(), config.limits().clone());

    if config.restore() {
        let store = JsonFileStore::open(config.state_file())?;
        coordinator.enable_restore(Box::new(store));
    }

    coordinator.add_sink(Box::new(LogSink));
    if let Some(path) = config.datalog_file() {
        coordinator.add_sink(Box::new(DatalogWriter::new(path)?));
    }

    let mut requests = startup_requests(&options, &config);
    let mut polls = PollScheduler::new(config.poll_interval());
    let mut rollover = DayRollover::new();

    coordinator.restart(config.ecu_id(), options.hard_reset);
    coordinator.log_summary();

    let deadline = options
        .runtime
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if rollover.observe(chrono::Local::now().date_naive()) {
            coordinator.reset_energy_today();
        }
        requests.dispatch(&mut coordinator);
        scheduler::poll_if_due(&mut polls, &mut coordinator, std::time::Instant::now());

        let delay = coordinator.tick();

        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(err) = result {
                    error!("failed to listen for ctrl-c: {}", err);
                }
                info!("Shutdown signal received");
                break;
            }
            _ = until(deadline) => {
                info!("Runtime limit reached");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
        }
    }

    coordinator.stop();
    coordinator.stats().print_summary();
    info!("Shutdown complete");

    Ok(())
}
