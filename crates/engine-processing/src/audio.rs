use crate::error::AudioError;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

enum Samples {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

/// A decoded WAV file, kept in memory so several spans can be cut from it.
pub struct WavClip {
    spec: WavSpec,
    samples: Samples,
}

impl WavClip {
    pub fn open(path: &Path) -> Result<Self, AudioError> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(AudioError::Unsupported(format!(
                "{} channels at {} Hz",
                spec.channels, spec.sample_rate
            )));
        }

        let samples = match spec.sample_format {
            SampleFormat::Int => Samples::Int(reader.samples::<i32>().collect::<Result<_, _>>()?),
            SampleFormat::Float => {
                if spec.bits_per_sample != 32 {
                    return Err(AudioError::Unsupported(format!(
                        "{}-bit float samples",
                        spec.bits_per_sample
                    )));
                }
                Samples::Float(reader.samples::<f32>().collect::<Result<_, _>>()?)
            }
        };

        Ok(Self { spec, samples })
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    fn frames(&self) -> usize {
        let len = match &self.samples {
            Samples::Int(s) => s.len(),
            Samples::Float(s) => s.len(),
        };
        len / self.spec.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.spec.sample_rate as f64
    }

    fn frame_at(&self, secs: f64) -> usize {
        let frame = (secs.max(0.0) * self.spec.sample_rate as f64).round() as usize;
        frame.min(self.frames())
    }

    /// Writes `[start, end)` seconds to `dest` with the source's format.
    /// Bounds are clamped to the clip. Returns the written duration, or `None`
    /// when the span is empty after clamping and nothing was written.
    pub fn write_span(&self, start: f64, end: f64, dest: &Path) -> Result<Option<f64>, AudioError> {
        let (from, to) = (self.frame_at(start), self.frame_at(end));
        if to <= from {
            return Ok(None);
        }

        let channels = self.spec.channels as usize;
        let range = from * channels..to * channels;
        let mut writer = WavWriter::create(dest, self.spec)?;
        match &self.samples {
            Samples::Int(s) => {
                for sample in &s[range] {
                    writer.write_sample(*sample)?;
                }
            }
            Samples::Float(s) => {
                for sample in &s[range] {
                    writer.write_sample(*sample)?;
                }
            }
        }
        writer.finalize()?;

        Ok(Some((to - from) as f64 / self.spec.sample_rate as f64))
    }
}
