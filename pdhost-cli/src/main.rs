mod args;
mod midi_out;
mod report;

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use args::{Args, USAGE};
use midi_out::MidiForwarder;
use report::CallbackReport;
use pdhost_audio::output::OutputStream;
use pdhost_audio::{devices, paths, Config, InstanceConfig, InstanceManager, LibPdBackend};

const UPDATE_INTERVAL: Duration = Duration::from_millis(10);
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    if let Err(e) = TermLogger::init(log_level, simplelog::Config::default(), TerminalMode::Stderr, ColorChoice::Auto) {
        eprintln!("logging unavailable: {}", e);
    }
}

fn main() -> io::Result<()> {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    init_logging(args.verbose);

    if args.is_listing() {
        list(&args);
        return Ok(());
    }
    if args.patches.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }

    run(args)
}

fn list(args: &Args) {
    if args.list_devices {
        for device in devices::enumerate_devices() {
            let marker = if device.is_default_output { "*" } else { " " };
            let rate = device.sample_rate.map(|r| format!("{} Hz", r)).unwrap_or_default();
            println!("{} {} {}", marker, device.name, rate);
        }
    }
    if args.list_midi {
        for port in midi_out::list_ports() {
            println!("{}: {}", port.index, port.name);
        }
    }
}

fn run(args: Args) -> io::Result<()> {
    let config = Config::load();
    let library = args.library.clone().unwrap_or_else(|| paths::library_path(&config));
    let backend = LibPdBackend::load(&library).map_err(io::Error::other)?;

    let mut settings = config.engine_settings();
    if args.verbose {
        settings.verbose = true;
    }
    if let Some(dir) = &args.patch_dir {
        settings.default_patch_dir = Some(dir.clone());
    }

    let mut output = config.output_config();
    if args.device.is_some() {
        output.device = args.device.clone();
    }
    let device = devices::output_device(output.device.as_deref()).map_err(io::Error::other)?;
    let host = devices::host_audio(&device, &output).map_err(io::Error::other)?;

    let mut manager = InstanceManager::with_settings(Arc::new(backend), settings).map_err(io::Error::other)?;
    let mut callbacks = Vec::new();
    let mut reports = Vec::new();
    for patch in &args.patches {
        let id = manager
            .create(InstanceConfig::new(patch.as_str(), patch.as_str(), ""), host)
            .map_err(io::Error::other)?;
        let Some(instance) = manager.instance(id) else {
            continue;
        };
        if instance.is_failed() {
            log::error!("{} failed to start ({:?})", patch, instance.state());
            continue;
        }
        callbacks.push(instance.audio_callback());
        reports.push(CallbackReport::new(instance.name(), instance.audio_callback()));
    }
    if callbacks.is_empty() {
        return Err(io::Error::other("no patch could be started"));
    }

    // Every instance sees every event, so forwarding from one is enough.
    if let Some(port) = args.midi_out {
        let forwarder = MidiForwarder::connect(port).map_err(io::Error::other)?;
        if let Some(&first) = manager.active().first() {
            if let Some(instance) = manager.instance_mut(first) {
                forwarder.attach(instance);
            }
        }
        log::info!("forwarding MIDI to {}", forwarder.port_name());
    }

    let stream = OutputStream::start(&device, host, callbacks).map_err(io::Error::other)?;
    log::info!(
        "{} patch(es) running at {} Hz; press Enter to stop",
        manager.active().len(),
        stream.host().sample_rate
    );

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        std::thread::spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().lock().read_line(&mut line);
            quit.store(true, Ordering::Relaxed);
        });
    }

    let mut last_report = Instant::now();
    while !quit.load(Ordering::Relaxed) {
        manager.update();
        if last_report.elapsed() >= REPORT_INTERVAL {
            reports.iter_mut().for_each(CallbackReport::poll);
            last_report = Instant::now();
        }
        std::thread::sleep(UPDATE_INTERVAL);
    }

    drop(stream);
    manager.destroy_all();
    Ok(())
}
