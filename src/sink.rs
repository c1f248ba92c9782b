//! Where samples go: bit-string text files, optionally behind a writer thread.
//!
//! Every sample becomes one line of `'0'`/`'1'` characters, most significant
//! bit of the first byte first. A [`BitField`] cut out of each sample can be
//! written to a second stream next to it.

use crate::Error;
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    sync::mpsc::{self, SyncSender},
    thread::{self, JoinHandle},
};

/// Render bytes as MSB-first bit text with no separators.
pub fn bit_string(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len() * 8);
    push_bits(&mut text, bytes);
    text
}

fn push_bits(text: &mut String, bytes: &[u8]) {
    for byte in bytes {
        for shift in (0..8).rev() {
            text.push(if (byte >> shift) & 1 == 1 { '1' } else { '0' });
        }
    }
}

/// Inverse of [`bit_string`].
pub fn from_bit_string(text: &str) -> Result<Vec<u8>, Error> {
    if text.len() % 8 != 0 {
        return Err(Error::InvalidBitString(format!(
            "length {} is not a multiple of 8",
            text.len()
        )));
    }
    text.as_bytes()
        .chunks(8)
        .map(|chunk| {
            chunk.iter().try_fold(0u8, |acc, c| match c {
                b'0' => Ok(acc << 1),
                b'1' => Ok((acc << 1) | 1),
                other => Err(Error::InvalidBitString(format!(
                    "unexpected character {:?}",
                    *other as char
                ))),
            })
        })
        .collect()
}

/// A run of bits inside a sample, counted MSB-first from the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub start: usize,
    pub width: usize,
}

impl core::fmt::Display for BitField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "bits {}-{}",
            self.start,
            self.start.saturating_add(self.width).saturating_sub(1)
        )
    }
}

impl BitField {
    pub fn new(start: usize, width: usize) -> Result<Self, Error> {
        if width == 0 {
            return Err(Error::InvalidConfig("bit field width must be positive".into()));
        }
        Ok(Self { start, width })
    }

    /// Fail unless the field lies inside a sample of `sample_bits` bits.
    pub fn check(&self, sample_bits: usize) -> Result<(), Error> {
        match self.start.checked_add(self.width) {
            Some(end) if self.width > 0 && end <= sample_bits => Ok(()),
            _ => Err(Error::FieldOutOfRange {
                field: *self,
                sample_bits,
            }),
        }
    }

    fn bits<'a>(&self, sample: &'a [u8]) -> impl Iterator<Item = bool> + 'a {
        (self.start..self.start + self.width).map(move |b| (sample[b / 8] >> (7 - b % 8)) & 1 == 1)
    }

    /// The field packed MSB-first into `ceil(width / 8)` bytes, zero padded at the end.
    pub fn extract(&self, sample: &[u8]) -> Result<Vec<u8>, Error> {
        self.check(sample.len() * 8)?;
        let mut packed = vec![0u8; self.width.div_ceil(8)];
        for (i, bit) in self.bits(sample).enumerate() {
            if bit {
                packed[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Ok(packed)
    }

    /// Exactly `width` characters, equal to the matching slice of [`bit_string`].
    pub fn bit_string(&self, sample: &[u8]) -> Result<String, Error> {
        self.check(sample.len() * 8)?;
        Ok(self
            .bits(sample)
            .map(|bit| if bit { '1' } else { '0' })
            .collect())
    }
}

/// Consumer of captured samples, called once per sample in capture order.
pub trait SampleSink {
    fn write_sample(&mut self, sample: &[u8]) -> io::Result<()>;
    /// Flush everything; no samples follow.
    fn finish(&mut self) -> io::Result<()>;
}

impl<S: SampleSink + ?Sized> SampleSink for &mut S {
    fn write_sample(&mut self, sample: &[u8]) -> io::Result<()> {
        (**self).write_sample(sample)
    }
    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

/// Writes each sample as a line of bit text, and optionally one field of it to a second writer.
pub struct TextSink<W: Write> {
    primary: W,
    derived: Option<(BitField, W)>,
    line: String,
}

impl<W: Write> TextSink<W> {
    pub fn new(primary: W, derived: Option<(BitField, W)>) -> Self {
        Self {
            primary,
            derived,
            line: String::new(),
        }
    }

    /// Like [`TextSink::new`], starting each stream with its descriptive header line.
    pub fn with_headers(
        primary: W,
        derived: Option<(BitField, W)>,
        sample_width: usize,
    ) -> io::Result<Self> {
        let mut sink = Self::new(primary, derived);
        writeln!(sink.primary, "Binary Data ({} bits per sample)", sample_width * 8)?;
        if let Some((field, writer)) = &mut sink.derived {
            writeln!(writer, "Counter Data ({field})")?;
        }
        Ok(sink)
    }

    pub fn into_inner(self) -> (W, Option<W>) {
        (self.primary, self.derived.map(|(_, writer)| writer))
    }
}

impl<W: Write> SampleSink for TextSink<W> {
    fn write_sample(&mut self, sample: &[u8]) -> io::Result<()> {
        // a field that does not fit must fail before either stream gets a record
        let field_text = match &self.derived {
            Some((field, _)) => Some(
                field
                    .bit_string(sample)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
            ),
            None => None,
        };
        self.line.clear();
        push_bits(&mut self.line, sample);
        self.line.push('\n');
        self.primary.write_all(self.line.as_bytes())?;
        if let (Some((_, writer)), Some(mut text)) = (&mut self.derived, field_text) {
            text.push('\n');
            writer.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.primary.flush()?;
        if let Some((_, writer)) = &mut self.derived {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Create the output files and write their headers.
pub fn open_files<P: AsRef<Path>>(
    primary: P,
    derived: Option<(P, BitField)>,
    sample_width: usize,
) -> io::Result<TextSink<BufWriter<File>>> {
    let primary = BufWriter::new(File::create(primary)?);
    let derived = match derived {
        Some((path, field)) => Some((field, BufWriter::new(File::create(path)?))),
        None => None,
    };
    TextSink::with_headers(primary, derived, sample_width)
}

/// Runs another sink on a writer thread behind a bounded queue.
///
/// When the queue is full [`write_sample`](SampleSink::write_sample) blocks until the
/// writer catches up; samples are never dropped. The first I/O error of the inner
/// sink ends the writer and is returned by the next call.
pub struct BoundedSink<S> {
    sender: Option<SyncSender<Vec<u8>>>,
    writer: Option<JoinHandle<io::Result<S>>>,
    inner: Option<S>,
}

impl<S: SampleSink + Send + 'static> BoundedSink<S> {
    pub fn spawn(mut inner: S, capacity: usize) -> io::Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(capacity);
        let writer = thread::Builder::new()
            .name("sample-writer".into())
            .spawn(move || {
                for sample in receiver {
                    inner.write_sample(&sample)?;
                }
                inner.finish()?;
                Ok(inner)
            })?;
        Ok(Self {
            sender: Some(sender),
            writer: Some(writer),
            inner: None,
        })
    }

    /// The inner sink, once [`finish`](SampleSink::finish) has succeeded.
    pub fn into_inner(mut self) -> Option<S> {
        self.inner.take()
    }

    fn join(&mut self) -> io::Result<()> {
        self.sender = None;
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let inner = writer
            .join()
            .map_err(|_| io::Error::other("sample writer panicked"))??;
        self.inner = Some(inner);
        Ok(())
    }
}

impl<S: SampleSink + Send + 'static> SampleSink for BoundedSink<S> {
    fn write_sample(&mut self, sample: &[u8]) -> io::Result<()> {
        let Some(sender) = &self.sender else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "sample writer already finished",
            ));
        };
        if sender.send(sample.to_vec()).is_err() {
            // the writer only hangs up after an error
            self.join()?;
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "sample writer stopped",
            ));
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.join()
    }
}

impl<S> Drop for BoundedSink<S> {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(writer) = self.writer.take() {
            if !matches!(writer.join(), Ok(Ok(_))) {
                log::warn!("Sample writer failed while dropping");
            }
        }
    }
}
