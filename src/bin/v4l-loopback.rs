extern crate clap;
extern crate v4l_loopback;

use std::fmt;
use std::process;
use std::str::FromStr;
use std::time::{Duration, Instant};

use clap::{value_t, App, Arg, ArgMatches};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use v4l_loopback::config::{SessionConfig, DEFAULT_BUFFERS, DEFAULT_ITERATIONS};
use v4l_loopback::device::{Driver, Format};
use v4l_loopback::loopback::Loopback;
use v4l_loopback::session::Session;
use v4l_loopback::FourCC;

fn main() {
    let matches = App::new("v4l-loopback")
        .version("0.1")
        .about("Streams frames from a source to a sink through a video4linux loopback device")
        .arg(
            Arg::with_name("device")
                .short("d")
                .long("device")
                .value_name("INDEX or PATH")
                .help("Loopback device node path or index (requires the v4l2 feature)")
                .takes_value(true)
                .conflicts_with("emulate"),
        )
        .arg(
            Arg::with_name("emulate")
                .short("e")
                .long("emulate")
                .help("Stream through an in-process loopback device (default)"),
        )
        .arg(
            Arg::with_name("count")
                .short("c")
                .long("count")
                .value_name("INT")
                .help("Number of loop iterations (default: 50)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("buffers")
                .short("b")
                .long("buffers")
                .value_name("INT")
                .help("Number of buffers to request per endpoint (default: 2)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("width")
                .long("width")
                .value_name("INT")
                .help("Frame width (default: 800)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("height")
                .long("height")
                .value_name("INT")
                .help("Frame height (default: 600)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("fourcc")
                .short("f")
                .long("fourcc")
                .value_name("CODE")
                .help("Pixel format (default: YU12)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .value_name("MS")
                .help("Give up waiting for a buffer after this many milliseconds")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("trace")
                .long("trace")
                .help("Print every queue and dequeue"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Raise the log level, repeat for more"),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let defaults = Format::default();
    let width = arg(&matches, "width", defaults.width);
    let height = arg(&matches, "height", defaults.height);
    let fourcc: FourCC = arg(&matches, "fourcc", defaults.fourcc);

    let mut device: String = matches.value_of("device").unwrap_or("loopback").to_string();
    if device.parse::<u64>().is_ok() {
        device = format!("/dev/video{}", device);
    }

    let mut config = SessionConfig::new(device.clone())
        .format(Format::new(width, height, fourcc))
        .iterations(arg(&matches, "count", DEFAULT_ITERATIONS))
        .buffers(arg(&matches, "buffers", DEFAULT_BUFFERS));
    if matches.is_present("timeout") {
        config = config.timeout(Duration::from_millis(arg(&matches, "timeout", 0)));
    }
    let trace = matches.is_present("trace");

    let res = if matches.is_present("device") {
        hardware(&config, trace)
    } else {
        println!("Using in-process loopback device\n");
        run(&Loopback::new(device), &config, trace)
    };

    if let Err(e) = res {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

/// Parses an optional argument, exiting with a usage error if it is malformed
fn arg<T>(matches: &ArgMatches, name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match matches.value_of(name) {
        None => default,
        Some(_) => value_t!(matches, name, T).unwrap_or_else(|e| e.exit()),
    }
}

#[cfg(feature = "v4l2")]
fn hardware(config: &SessionConfig, trace: bool) -> v4l_loopback::Result<()> {
    println!("Using device: {}\n", config.source.name);
    run(&v4l_loopback::v4l2::device::Device, config, trace)
}

#[cfg(not(feature = "v4l2"))]
fn hardware(_config: &SessionConfig, _trace: bool) -> v4l_loopback::Result<()> {
    eprintln!("error: built without video4linux support, rebuild with --features v4l2");
    process::exit(2);
}

fn run<D: Driver>(driver: &D, config: &SessionConfig, trace: bool) -> v4l_loopback::Result<()> {
    let mut session = Session::open(driver, config)?;
    if let Some(fmt) = session.source().format() {
        println!("Active format:\n{}", fmt);
    }
    println!(
        "Buffers: source {}, sink {}\n",
        session.source().len(),
        session.sink().len()
    );

    if trace {
        session.source_mut().set_trace_hook(|r| println!("{}", r));
        session.sink_mut().set_trace_hook(|r| println!("{}", r));
    }

    session.start()?;

    let start = Instant::now();
    let mut bytes: u64 = 0;
    let mut reclaims = 0;
    for i in 0..config.iterations {
        let pattern = i as u8;
        let step = session.step_with(
            |frame| frame.iter_mut().for_each(|b| *b = pattern),
            |frame, meta| {
                bytes += meta.bytesused as u64;
                debug!(
                    sequence = meta.sequence,
                    bytesused = meta.bytesused,
                    first = frame.first().copied().unwrap_or(0),
                    "frame"
                );
            },
        )?;
        if step.reclaimed {
            reclaims += 1;
        }
    }
    let elapsed = start.elapsed().as_secs_f64();

    session.stop()?;

    println!();
    println!("Frames   : {}", config.iterations);
    println!("Reclaims : {}", reclaims);
    println!("FPS      : {}", config.iterations as f64 / elapsed);
    println!("MB/s     : {}", bytes as f64 / 1_048_576.0 / elapsed);
    Ok(())
}
