#![deny(clippy::all)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![deny(clippy::style)]
#![deny(clippy::print_stdout)]
#![deny(clippy::cast_lossless)]

use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use aurcor::{
    config::AurcorConfig, Buses, DirStorage, LEDBus, ProfileKind, Storage,
    BYTES_PER_LED,
};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Report};
use log::{debug, info};

#[derive(Parser)]
#[clap(author, version, about = "Drives LED buses from persisted per-bus state")]
struct Args {
    /// Startup config listing the buses
    #[clap(long, default_value = "config.json")]
    config: PathBuf,

    /// Directory holding persisted profiles and bus configuration
    #[clap(long, default_value = "data")]
    data_dir: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log the configuration and normal profile of every bus
    Show,
    /// Turn every LED off
    Clear,
    /// Write a solid colour through the normal profile
    Run {
        #[clap(long, default_value_t = 100)]
        frames: u32,

        /// Level of every channel before the profile is applied
        #[clap(long, default_value_t = 255)]
        level: u8,
    },
}

fn main() -> Result<(), Report> {
    setup_logging()?;

    let args = Args::parse();
    let config = AurcorConfig::load_or_create(&args.config)?;

    fs::create_dir_all(&args.data_dir)?;
    let storage: Arc<dyn Storage> = Arc::new(DirStorage::new(&args.data_dir));
    let buses = config.build_buses(&storage)?;

    if buses.is_empty() {
        return Err(eyre!("No buses configured in {}", args.config.display()));
    }

    match args.command {
        Command::Show => show(&buses)?,
        Command::Clear => buses.iter().for_each(|bus| bus.clear()),
        Command::Run { frames, level } => run(&buses, frames, level)?,
    }

    Ok(())
}

fn show(buses: &Buses) -> Result<(), Report> {
    for bus in buses.iter() {
        let config = bus.config();

        info!(
            "Bus {} ({}): {} LEDs, reverse {}, format {}",
            bus.name(),
            bus.type_name(),
            bus.length(),
            bus.reverse(),
            bus.format()
        );
        info!(
            "  default preset {:?}, {} fps, reset time {}µs, UDP port {} queue {}",
            config.default_preset(),
            config.default_fps(),
            config.reset_time_us(),
            config.udp_port(),
            config.udp_queue_size()
        );

        let mut rows = String::new();
        bus.profile(ProfileKind::Normal).print(&mut rows, bus.length())?;
        for row in rows.lines() {
            info!("  {}", row);
        }
    }

    Ok(())
}

fn run(buses: &Buses, frames: u32, level: u8) -> Result<(), Report> {
    let handles: Vec<JoinHandle<()>> = buses
        .iter()
        .map(|bus| {
            let bus = Arc::clone(bus);
            thread::spawn(move || run_bus(&bus, frames, level))
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| eyre!("Bus thread panicked"))?;
    }

    Ok(())
}

fn run_bus(bus: &LEDBus, frames: u32, level: u8) {
    let interval = Duration::from_secs(1) / bus.default_fps();
    let started = Instant::now();

    debug!("Bus {} running at {:?} per frame", bus.name(), interval);

    for frame in 0..frames {
        let mut data = vec![level; bus.length() * BYTES_PER_LED];
        bus.profile(ProfileKind::Normal).transform(&mut data);
        bus.write(&data, false);

        let next = interval * (frame + 1);
        if let Some(wait) = next.checked_sub(started.elapsed()) {
            thread::sleep(wait);
        }
    }

    info!(
        "Bus {} wrote {} frames in {:?}",
        bus.name(),
        frames,
        started.elapsed()
    );
}

fn setup_logging() -> Result<(), Report> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "1");
    }
    color_eyre::install()?;

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "aurcor=info");
    }
    env_logger::init();

    Ok(())
}
