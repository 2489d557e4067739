//! Stream copy tool
//!
//! Copies one stream to another, applying the input's channel selection and
//! optionally a time window.
//!
//! ```text
//! vtcat [-v] [-L logfile] [-T start,end] input [output]
//! ```

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use vlf_stream::{
    config::RuntimeConfig,
    runtime::Runtime,
    stream::{InputStream, OutputStream},
    time::TimeRange,
};

struct Args {
    config: RuntimeConfig,
    range: TimeRange,
    input: String,
    output: String,
}

fn usage() -> ! {
    eprintln!("usage: vtcat [-v] [-L logfile] [-T start,end] input [output]");
    std::process::exit(1);
}

fn parse_args() -> Result<Args> {
    let mut config = RuntimeConfig::load()?;
    let mut range = TimeRange::default();
    let mut names = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" => config.up_verbosity(),
            "-L" => {
                let file = args.next().context("-L needs a log file")?;
                config.log.file = Some(PathBuf::from(file));
            }
            "-T" => {
                let text = args.next().context("-T needs a time range")?;
                range = TimeRange::parse(&text)?;
            }
            "-h" | "--help" => usage(),
            _ => names.push(arg),
        }
    }

    let (input, output) = match names.len() {
        1 => (names.remove(0), "-".to_string()),
        2 => {
            let output = names.remove(1);
            (names.remove(0), output)
        }
        _ => usage(),
    };

    Ok(Args {
        config,
        range,
        input,
        output,
    })
}

fn run(runtime: &Runtime, args: &Args) -> Result<()> {
    let transport = &runtime.config().transport;
    let mut input = InputStream::open(&args.input, transport)?;
    let params = *input.params();
    let mut output = OutputStream::open(
        &args.output,
        input.channels() as u32,
        false,
        params.sample_rate,
        transport,
    )?;

    let mut frames: u64 = 0;
    let mut anchor = true;
    while let Some(t) = input.timestamp()? {
        let Some(srcal) = input.srcal()? else {
            break;
        };
        anchor |= input.is_block_start()? == Some(true);

        let Some(frame) = input.get_frame()? else {
            break;
        };
        if args.range.is_past(t) {
            tracing::info!("end of time range reached");
            break;
        }
        if !args.range.contains(t) {
            anchor = true;
            continue;
        }

        if anchor {
            output.set_timebase(t, srcal)?;
            anchor = false;
        }
        output.insert_frame(frame)?;
        frames += 1;
    }

    tracing::info!(
        "copied {} frames in {} blocks",
        frames,
        output.blocks_written() + u64::from(output.frames_buffered() > 0)
    );
    output.close()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args()?;
    if args.input.is_empty() || args.output.is_empty() {
        bail!("empty stream name");
    }

    let runtime = Runtime::init("vtcat", args.config.clone())?;
    if let Err(e) = run(&runtime, &args) {
        runtime.bailout(format!("{:#}", e));
    }
    runtime.exit("finished")
}
