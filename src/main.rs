//! usbasp-console - serial debug console for USBasp probes
//!
//! Talks to the probe's UART bridge over vendor control transfers and shows
//! the device output as an interactive line-oriented terminal.
//!
//! # Quick Start
//!
//! ```text
//! usbasp-console              # Connect to the first probe at the configured rate
//! usbasp-console -b 19200     # Override the baud rate
//! usbasp-console -l           # List probes
//! usbasp-console -p 1         # Blink the indicator of probe #1
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | F2 | Connect / reconnect |
//! | F3 | Disconnect |
//! | F4 | Ping selected probe |
//! | F5 | Next baud rate |
//! | F8 | Clear console |
//! | F10 | Quit |

mod app;
mod config;
mod core;
mod ui;

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use crossterm::event::{self, Event, KeyEventKind};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::app::{App, AppOptions};
use crate::config::{BaudRateType, Config};
use crate::core::session::DeviceSession;
use crate::core::term::ConsoleUpdate;
use crate::core::usb::{BaudRate, RusbChannel};
use crate::ui::Renderer;

/// Command line options
#[derive(Debug, Default)]
struct Options {
    /// Device index to use
    device: Option<usize>,
    /// Baud rate overriding the config file
    baud: Option<BaudRate>,
    /// Print devices and exit
    list: bool,
    /// Ping this device and exit
    ping: Option<usize>,
    /// Capture file overriding the config file
    output: Option<PathBuf>,
    verbose: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("usbasp-console {}", VERSION);
}

fn print_help() {
    eprintln!("usbasp-console {} - serial debug console for USBasp probes", VERSION);
    eprintln!();
    eprintln!("Usage: usbasp-console [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -d, --device <N>      Use device number N (default: 0)");
    eprintln!("  -b, --baud <BPS>      Baud rate: 2400, 4800, 9600, 19200, 28800, 38400");
    eprintln!("                        (57600 is experimental)");
    eprintln!("  -l, --list            List connected devices and exit");
    eprintln!("  -p, --ping <N>        Blink the indicator of device N and exit");
    eprintln!("  -o, --output <FILE>   Append received text to FILE");
    eprintln!("      --verbose         Debug logging");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  F2                    Connect / reconnect");
    eprintln!("  F3                    Disconnect");
    eprintln!("  F4                    Ping the selected device");
    eprintln!("  F5                    Next baud rate");
    eprintln!("  F8                    Clear console");
    eprintln!("  F10, Ctrl+Alt+Q       Quit");
    eprintln!();
    eprintln!("Configuration: ~/.usbasp-console/config.toml");
    eprintln!("Log file:      ~/.usbasp-console/usbasp-console.log");
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    // Value following a flag
    fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
        *i += 1;
        args.get(*i)
            .map(|s| s.as_str())
            .ok_or_else(|| format!("Missing argument for {}", flag))
    }

    fn number(text: &str, flag: &str) -> Result<usize, String> {
        text.parse()
            .map_err(|_| format!("Invalid number for {}: {}", flag, text))
    }

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            flag @ ("-d" | "--device") => {
                options.device = Some(number(value(&args, &mut i, flag)?, flag)?);
            }
            flag @ ("-b" | "--baud") => {
                let text = value(&args, &mut i, flag)?;
                let bps = text
                    .parse()
                    .ok()
                    .and_then(BaudRate::from_bps)
                    .ok_or_else(|| format!("Unsupported baud rate: {}", text))?;
                options.baud = Some(bps);
            }
            "-l" | "--list" => {
                options.list = true;
            }
            flag @ ("-p" | "--ping") => {
                options.ping = Some(number(value(&args, &mut i, flag)?, flag)?);
            }
            flag @ ("-o" | "--output") => {
                options.output = Some(PathBuf::from(value(&args, &mut i, flag)?));
            }
            "--verbose" => {
                options.verbose = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

fn init_logging(verbose: bool) {
    let log_path = Config::app_dir()
        .map(|dir| dir.join("usbasp-console.log"))
        .unwrap_or_else(|| PathBuf::from("usbasp-console.log"));

    // Open log file (append mode)
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging(options.verbose);
    info!("usbasp-console {} starting...", VERSION);

    let mut config = Config::load();
    let channel = RusbChannel::new()?;

    if options.list {
        return list_devices(channel);
    }
    if let Some(device) = options.ping {
        return ping_device(channel, device);
    }

    let baud = options.baud.unwrap_or_else(|| config.serial.baud());
    if baud.is_experimental() {
        eprintln!("Warning: {} baud is experimental and may not work on every probe", baud);
    }

    let capture_path = options.output.clone().or_else(|| config.capture_file.clone());
    let capture: Option<Box<dyn Write>> = match capture_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Cannot open capture file {}", path.display()))?;
            info!("Capturing to {}", path.display());
            Some(Box::new(file))
        }
        None => None,
    };

    let app_options = AppOptions {
        device: options.device.unwrap_or(0),
        baud,
        max_rows: config.console.max_rows,
        local_echo: config.console.local_echo,
    };
    let mut app = App::new(channel, app_options, capture);

    let mut renderer = Renderer::new(
        config.console.foreground_color(),
        config.console.background_color(),
    );
    renderer.init()?;

    let result = run_console(&mut app, &mut renderer);

    app.shutdown();
    let _ = renderer.cleanup();

    let baud = app.baud();
    if config.serial.baud_rate_type == BaudRateType::Auto
        && !baud.is_experimental()
        && config.serial.baud() != baud
    {
        config.serial.baud_rate = baud.bps();
        if let Err(e) = config.save() {
            error!("Failed to save config: {:#}", e);
        }
    }

    info!("usbasp-console exiting");
    result
}

fn run_console(app: &mut App<RusbChannel>, renderer: &mut Renderer) -> anyhow::Result<()> {
    app.start();
    renderer.render(app.console(), &app.status_line())?;

    while !app.should_quit() {
        let mut update = ConsoleUpdate::default();

        if event::poll(app.poll_timeout(Instant::now()))? {
            match event::read()? {
                // Only process key press events
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    update = app.handle_key(&key);
                }
                Event::Resize(cols, rows) => {
                    info!("Terminal resized to {}x{}", cols, rows);
                    update.dirty = true;
                }
                _ => {}
            }
        }

        update.merge(app.pump(Instant::now()));

        if update.beeps > 0 {
            renderer.beep()?;
        }
        if update.dirty {
            renderer.render(app.console(), &app.status_line())?;
        }
    }

    Ok(())
}

/// `--list`: print every probe found
fn list_devices(channel: RusbChannel) -> anyhow::Result<()> {
    let (tx, _rx) = std::sync::mpsc::channel();
    let mut session = DeviceSession::new(channel, tx);
    let count = session.find_devices()?;

    if count == 0 {
        println!("No device found");
    }
    for (n, info) in session.devices().iter().enumerate() {
        println!("Device {} on bus {} address {}", n, info.bus, info.address);
    }
    Ok(())
}

/// `--ping N`: run one full ping cycle
fn ping_device(channel: RusbChannel, device: usize) -> anyhow::Result<()> {
    let (tx, _rx) = std::sync::mpsc::channel();
    let mut session = DeviceSession::new(channel, tx);
    session.find_devices()?;
    session.ping(device)?;
    println!("Pinging device {}...", device);

    while session.is_pinging() {
        if let Some(deadline) = session.next_deadline() {
            std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        }
        session.service(Instant::now());
    }
    Ok(())
}
