//! Drishti - M-series lidar streaming client

use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, bounded};
use drishti_io::config::Config;
use drishti_io::types::CartesianPoint;
use drishti_io::{
    Error, FailoverParser, MSeriesParser, PacketDispatcher, PointCloud, PolarToCartConverter,
    StreamClient,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "drishti-io")]
#[command(about = "Stream point clouds from an M-series lidar sensor")]
struct Args {
    /// Sensor hostname or IP address
    #[arg(long)]
    host: Option<String>,

    /// Sensor TCP port (default 4141)
    #[arg(long)]
    port: Option<u16>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> drishti_io::Result<()> {
    let config = match args.config {
        Some(ref path) => {
            log::info!("Using config: {path}");
            Config::load(path)?
        }
        None => Config::default(),
    };

    let host = args
        .host
        .or_else(|| config.sensor.host.clone())
        .ok_or_else(|| {
            Error::Config("no sensor host given; pass --host or set it in the config".into())
        })?;
    let port = args.port.unwrap_or(config.sensor.port);

    // One parser per framed packet type, failover last so header-bearing
    // packets are routed by type first
    let mut parser_00 = MSeriesParser::new_00();
    config.apply_to(parser_00.accumulator_mut())?;
    let mut parser_01 = MSeriesParser::new_01();
    config.apply_to(parser_01.accumulator_mut())?;

    let mut dispatcher = PacketDispatcher::new();
    dispatcher.register(Box::new(parser_00));
    dispatcher.register(Box::new(parser_01));
    if config.sensor.failover {
        let mut failover = FailoverParser::new();
        failover.set_frame_id(&config.parser.frame_id);
        dispatcher.register(Box::new(failover));
    }
    let dispatcher = Arc::new(Mutex::new(dispatcher));

    let converter = Arc::new(PolarToCartConverter::new());

    let mut client = StreamClient::new(host.clone(), port);
    client.set_failover(config.sensor.failover);
    client.set_read_timeout(config.sensor.read_timeout());
    let client = Arc::new(client);

    let fatal = Arc::new(AtomicBool::new(false));

    // Wire the stages: client -> dispatcher -> converter -> stats loop.
    // The subscriptions must outlive the stream thread.
    let _packet_subscription = {
        let dispatcher = Arc::clone(&dispatcher);
        let fatal = Arc::clone(&fatal);
        client.subscribe(move |packet| match dispatcher.lock().dispatch(packet) {
            Ok(_) => {}
            Err(e @ (Error::FirmwareVersionMismatch | Error::FirmwareWatchdogViolation)) => {
                log::error!("Sensor reported a fatal condition: {e}");
                fatal.store(true, Ordering::SeqCst);
            }
            Err(e) => log::warn!("Packet dropped: {e}"),
        })
    };

    let _cloud_subscription = {
        let converter = Arc::clone(&converter);
        dispatcher
            .lock()
            .subscribe(move |cloud| converter.accept(cloud))
    };

    let (clouds_tx, clouds_rx) = bounded::<Arc<PointCloud<CartesianPoint>>>(16);
    let _cart_subscription = converter.subscribe(move |cloud| {
        if clouds_tx.try_send(Arc::clone(cloud)).is_err() {
            log::warn!("Cloud consumer lagging; dropping cloud {}", cloud.header.seq);
        }
    });

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        let client = Arc::clone(&client);
        ctrlc::set_handler(move || {
            log::info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
            client.stop();
        })
        .map_err(|e| Error::Config(format!("Failed to set signal handler: {e}")))?;
    }

    log::info!("Streaming from {host}:{port}");
    let stream_thread = {
        let client = Arc::clone(&client);
        thread::Builder::new()
            .name("sensor-stream".to_string())
            .spawn(move || client.run())?
    };

    while running.load(Ordering::SeqCst) && !fatal.load(Ordering::SeqCst) {
        match clouds_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(cloud) => {
                log::info!(
                    "Cloud {}: {} points ({}x{}), stamp {} us{}",
                    cloud.header.seq,
                    cloud.len(),
                    cloud.height,
                    cloud.width,
                    cloud.header.stamp,
                    if cloud.is_dense { "" } else { ", sparse" }
                );
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if stream_thread.is_finished() {
            break;
        }
    }

    client.stop();
    stream_thread
        .join()
        .map_err(|_| Error::Config("stream thread panicked".into()))??;

    log::info!("drishti-io stopped");
    Ok(())
}
