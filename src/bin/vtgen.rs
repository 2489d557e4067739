//! Test signal generator
//!
//! Writes a sine wave at real-time pace, timestamped from the wall clock.
//!
//! ```text
//! vtgen [-v] -r rate [-f freq] [-a amplitude] [-c channels] [-s secs] output
//! ```

use anyhow::{bail, Context, Result};
use std::f64::consts::TAU;
use std::time::{Duration, Instant};

use vlf_stream::{config::RuntimeConfig, runtime::Runtime, stream::OutputStream, time::Timestamp};

struct Args {
    config: RuntimeConfig,
    rate: u32,
    freq: f64,
    amplitude: f64,
    channels: u32,
    secs: Option<f64>,
    output: String,
}

fn usage() -> ! {
    eprintln!("usage: vtgen [-v] -r rate [-f freq] [-a amplitude] [-c channels] [-s secs] output");
    std::process::exit(1);
}

fn value<T: std::str::FromStr>(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<T> {
    let text = args.next().with_context(|| format!("{} needs a value", flag))?;
    text.parse()
        .map_err(|_| anyhow::anyhow!("invalid value for {}: {}", flag, text))
}

fn parse_args() -> Result<Args> {
    let mut config = RuntimeConfig::load()?;
    let mut rate = 0;
    let mut freq = 1000.0;
    let mut amplitude = 0.5;
    let mut channels = 1;
    let mut secs = None;
    let mut output = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" => config.up_verbosity(),
            "-r" => rate = value(&mut args, "-r")?,
            "-f" => freq = value(&mut args, "-f")?,
            "-a" => amplitude = value(&mut args, "-a")?,
            "-c" => channels = value(&mut args, "-c")?,
            "-s" => secs = Some(value(&mut args, "-s")?),
            "-h" | "--help" => usage(),
            _ if output.is_none() => output = Some(arg),
            _ => usage(),
        }
    }

    let Some(output) = output else { usage() };
    if rate == 0 {
        bail!("sample rate must be given with -r");
    }
    if channels == 0 {
        bail!("at least one channel needed");
    }

    Ok(Args {
        config,
        rate,
        freq,
        amplitude,
        channels,
        secs,
        output,
    })
}

fn run(runtime: &Runtime, args: &Args) -> Result<()> {
    let mut output = OutputStream::open(
        &args.output,
        args.channels,
        false,
        args.rate,
        &runtime.config().transport,
    )?;

    let total = args.secs.map(|s| (s * args.rate as f64).round() as u64);
    let fpb = output.params().frames_per_block as u64;
    let mut frame = vec![0.0; args.channels as usize];

    output.set_timebase(Timestamp::now(), 1.0)?;
    let started = Instant::now();

    let mut n: u64 = 0;
    while total.map_or(true, |t| n < t) {
        let v = args.amplitude * (TAU * args.freq * n as f64 / args.rate as f64).sin();
        frame.fill(v);
        output.insert_frame(&frame)?;
        n += 1;

        // Pace to real time once per block
        if n % fpb == 0 {
            let due = Duration::from_secs_f64(n as f64 / args.rate as f64);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
    }

    tracing::info!("generated {} frames", n);
    output.close()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let runtime = Runtime::init("vtgen", args.config.clone())?;
    if let Err(e) = run(&runtime, &args) {
        runtime.bailout(format!("{:#}", e));
    }
    runtime.exit("finished")
}
