//! Batched sample capture on a configured session.

use crate::{
    Error,
    config::CaptureConfig,
    mpsse::MpsseState,
    retry::RetryPolicy,
    session::Session,
    sink::SampleSink,
    spi::ChipSelect,
    transport::{self, Transport},
};
use eh1::delay::DelayNs;
use std::time::{Duration, Instant};

/// Fewer samples arrived than were requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub requested: usize,
    pub received: usize,
}

impl Shortfall {
    pub fn missing(&self) -> usize {
        self.requested - self.received
    }
}

/// Complete samples of one batch, borrowed from the session's response buffer.
#[derive(Debug)]
pub struct Batch<'a> {
    data: &'a [u8],
    requested: usize,
    sample_width: usize,
}

impl<'a> Batch<'a> {
    pub fn samples(&self) -> std::slice::ChunksExact<'a, u8> {
        self.data.chunks_exact(self.sample_width)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn received(&self) -> usize {
        self.data.len() / self.sample_width
    }

    pub fn shortfall(&self) -> Option<Shortfall> {
        let received = self.received();
        (received < self.requested).then_some(Shortfall {
            requested: self.requested,
            received,
        })
    }

    /// Turn a shortfall into [`Error::TransferShortfall`].
    pub fn into_complete(self) -> Result<Self, Error> {
        match self.shortfall() {
            Some(Shortfall {
                requested,
                received,
            }) => Err(Error::TransferShortfall {
                requested,
                received,
            }),
            None => Ok(self),
        }
    }
}

impl<T: Transport, D: DelayNs> Session<T, D> {
    /// Clock in `n_samples` samples with one USB write and drain the answers.
    ///
    /// A shortfall is not an error; check [`Batch::shortfall`]. Bytes of a trailing
    /// partial sample are dropped.
    pub fn receive_batch(
        &mut self,
        n_samples: usize,
        retry: &RetryPolicy,
    ) -> Result<Batch<'_>, Error> {
        let spi = match (self.state, self.spi) {
            (MpsseState::Configured, Some(spi)) => spi,
            _ => return Err(Error::NotConfigured),
        };
        if n_samples == 0 {
            return Err(Error::InvalidConfig("a batch needs at least one sample".into()));
        }
        let required = n_samples
            .checked_mul(spi.opcode_bytes_per_sample())
            .and_then(|n| n.checked_add(1))
            .unwrap_or(usize::MAX);
        if required > self.command_capacity {
            return Err(Error::BufferOverflow {
                required,
                capacity: self.command_capacity,
            });
        }

        let falling = spi.timing().sample_on_falling();
        let direction = spi.gpio_direction();
        self.command.clear();
        for _ in 0..n_samples {
            match spi.chip_select {
                ChipSelect::PerSample { .. } => {
                    self.command
                        .set_gpio_lower(spi.gpio_value(true), direction)
                        .shift_bytes_in(falling, spi.sample_width)
                        .set_gpio_lower(spi.gpio_value(false), direction);
                }
                ChipSelect::None | ChipSelect::Held { .. } => {
                    self.command.shift_bytes_in(falling, spi.sample_width);
                }
            }
        }
        self.command.send_immediate();
        self.write_command()?;

        let expected = self.command.read_len();
        self.response.clear();
        self.response.resize(expected, 0);
        let transport = &mut self.transport;
        let response = &mut self.response;
        let received = retry.drain(&mut self.delay, n_samples, expected, |missing| {
            let queued = transport.queue_status()?;
            if queued == 0 {
                return Ok(0);
            }
            let start = expected - missing;
            transport.read(&mut response[start..start + queued.min(missing)])
        })?;

        let complete = received - received % spi.sample_width;
        if complete < received {
            log::debug!("Dropping {} bytes of a partial sample", received - complete);
        }
        self.response.truncate(complete);
        let batch = Batch {
            data: &self.response,
            requested: n_samples,
            sample_width: spi.sample_width,
        };
        if let Some(shortfall) = batch.shortfall() {
            log::warn!(
                "Shortfall: received {} of {} samples",
                shortfall.received,
                shortfall.requested
            );
        }
        Ok(batch)
    }
}

/// Outcome of [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureReport {
    pub requested: usize,
    pub received: usize,
    pub batches: usize,
    pub elapsed: Duration,
    pub sample_width: usize,
}

impl CaptureReport {
    pub fn shortfall(&self) -> Option<Shortfall> {
        (self.received < self.requested).then_some(Shortfall {
            requested: self.requested,
            received: self.received,
        })
    }

    pub fn samples_per_second(&self) -> f64 {
        rate(self.received, self.elapsed)
    }

    pub fn mib_per_second(&self) -> f64 {
        self.samples_per_second() * self.sample_width as f64 / (1024.0 * 1024.0)
    }
}

fn rate(samples: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { samples as f64 / secs } else { 0.0 }
}

impl core::fmt::Display for CaptureReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Captured {}/{} samples in {} batches, {:.3?}, {:.0} samples/s, {:.2} MiB/s",
            self.received,
            self.requested,
            self.batches,
            self.elapsed,
            self.samples_per_second(),
            self.mib_per_second()
        )?;
        if let Some(shortfall) = self.shortfall() {
            write!(f, ", {} missing", shortfall.missing())?;
        }
        Ok(())
    }
}

/// Capture `config.total_samples` samples in batches and pass each one to `sink`.
///
/// Every received sample is written; nothing is padded. The sink is finished
/// before returning.
pub fn run<T, D, S>(
    session: &mut Session<T, D>,
    config: &CaptureConfig,
    sink: &mut S,
) -> Result<CaptureReport, Error>
where
    T: Transport,
    D: DelayNs,
    S: SampleSink,
{
    if config.total_samples == 0 || config.batch_size == 0 {
        return Err(Error::InvalidConfig(
            "total samples and batch size must be positive".into(),
        ));
    }
    let sample_width = session
        .spi
        .map(|spi| spi.sample_width)
        .ok_or(Error::NotConfigured)?;
    session.set_command_capacity(config.command_capacity);

    let start = Instant::now();
    let mut report = CaptureReport {
        requested: config.total_samples,
        received: 0,
        batches: 0,
        elapsed: Duration::ZERO,
        sample_width,
    };
    while report.received < config.total_samples {
        let n = config.batch_size.min(config.total_samples - report.received);
        let batch = session.receive_batch(n, &config.retry)?;
        for sample in batch.samples() {
            sink.write_sample(sample).map_err(Error::Sink)?;
        }
        let received = batch.received();
        let shortfall = batch.shortfall();
        report.received += received;
        report.batches += 1;

        if config.progress_every > 0 && report.batches % config.progress_every == 0 {
            log::info!(
                "Batch {}: {}/{} samples ({:.1}%), {:.0} samples/s",
                report.batches,
                report.received,
                config.total_samples,
                report.received as f64 * 100.0 / config.total_samples as f64,
                rate(report.received, start.elapsed())
            );
        }
        if shortfall.is_some() {
            if config.stop_on_shortfall || received == 0 {
                break;
            }
            // late bytes would misalign the next batch
            let late = transport::drain_and_discard(&mut session.transport)?;
            if !late.is_empty() {
                log::debug!("Discarded {} late bytes", late.len());
            }
        }
    }
    sink.finish().map_err(Error::Sink)?;
    report.elapsed = start.elapsed();
    log::info!("{report}");
    Ok(report)
}
