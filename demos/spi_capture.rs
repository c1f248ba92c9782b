use std::path::PathBuf;

use clap::Parser;
use eh1::spi::{MODE_0, MODE_1, MODE_2, MODE_3, Mode};
use mpsse_capture::{
    Config, DeviceSelector, Session, capture,
    sink::{self, BoundedSink},
    spi::{ChipSelect, divisor_for},
};

/// Capture fixed-width SPI samples from an FT232H and write them as bit strings
#[derive(Parser, Debug)]
#[command(name = "spi_capture", version, about, long_about = None)]
struct Cli {
    /// Number of samples to capture
    total_samples: Option<i64>,

    /// Samples per USB batch
    batch_size: Option<i64>,

    /// Open the first device whose description contains this text
    #[arg(long)]
    device: Option<String>,

    /// SPI mode (0-3)
    #[arg(long)]
    mode: Option<u8>,

    /// Bit clock in Hz, rounded down to what the divisor can produce
    #[arg(long)]
    frequency: Option<u32>,

    /// Toggle chip select around every sample instead of holding it
    #[arg(long)]
    per_sample_cs: bool,

    /// Do not write the counter field file
    #[arg(long)]
    no_counter: bool,

    #[arg(long, default_value = "output.txt")]
    output: PathBuf,

    #[arg(long, default_value = "CounterOutput.txt")]
    counter_output: PathBuf,

    /// Write files from a second thread, queueing at most this many samples
    #[arg(long)]
    queue: Option<usize>,
}

/// Use `value` when it is positive, otherwise warn and keep `default`.
fn positive_or_default(name: &str, value: Option<i64>, default: usize) -> usize {
    let Some(value) = value else {
        return default;
    };
    match usize::try_from(value) {
        Ok(v) if v > 0 => v,
        _ => {
            log::warn!("Invalid {name} {value}, using default {default}");
            default
        }
    }
}

fn spi_mode(mode: Option<u8>) -> Mode {
    match mode {
        None | Some(0) => MODE_0,
        Some(1) => MODE_1,
        Some(2) => MODE_2,
        Some(3) => MODE_3,
        Some(other) => {
            log::warn!("Invalid SPI mode {other}, using mode 0");
            MODE_0
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = Config::default();
    let defaults = config.capture;
    config.spi.mode = spi_mode(cli.mode);
    if let Some(frequency) = cli.frequency {
        config.spi.clock_divisor = divisor_for(frequency);
    }
    if cli.per_sample_cs {
        config.spi.chip_select = ChipSelect::PerSample {
            pin: 3,
            active_high: false,
        };
    }
    config.capture.total_samples =
        positive_or_default("total samples", cli.total_samples, defaults.total_samples);
    config.capture.batch_size =
        positive_or_default("batch size", cli.batch_size, defaults.batch_size);
    let max_batch = (config.capture.command_capacity - 1) / config.spi.opcode_bytes_per_sample();
    if config.capture.batch_size > max_batch {
        log::warn!(
            "Batch size {} exceeds the command buffer, using default {}",
            config.capture.batch_size,
            defaults.batch_size
        );
        config.capture.batch_size = defaults.batch_size;
    }
    if cli.no_counter {
        config.capture.counter = None;
    }
    config.validate()?;

    let selector = match cli.device {
        Some(description) => DeviceSelector::Description(description),
        None => DeviceSelector::Index(0),
    };
    let mut session = Session::open(&selector, &config.usb)?;
    session.bring_up(&config.spi, &config.timing)?;
    log::info!(
        "Capturing {} samples of {} bits, batch size {}",
        config.capture.total_samples,
        config.spi.sample_width * 8,
        config.capture.batch_size
    );

    let files = sink::open_files(
        &cli.output,
        config
            .capture
            .counter
            .map(|field| (&cli.counter_output, field)),
        config.spi.sample_width,
    )?;
    let report = match cli.queue {
        Some(capacity) => {
            let mut sink = BoundedSink::spawn(files, capacity)?;
            capture::run(&mut session, &config.capture, &mut sink)?
        }
        None => {
            let mut sink = files;
            capture::run(&mut session, &config.capture, &mut sink)?
        }
    };
    session.close()?;

    println!("{report}");
    println!("Binary data written to {}", cli.output.display());
    if config.capture.counter.is_some() {
        println!("Counter data written to {}", cli.counter_output.display());
    }
    if let Some(shortfall) = report.shortfall() {
        anyhow::bail!(
            "only {} of {} samples were received",
            shortfall.received,
            shortfall.requested
        );
    }
    Ok(())
}
