//! WAV sink for the DMA output stream.

use emu_genesis::audio_out::{unpack_left, unpack_right, I2sOutput};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Writes every I2S word as one 16-bit stereo frame.
pub struct WavOutput {
    writer: Option<WavWriter<BufWriter<File>>>,
    failed: bool,
}

impl WavOutput {
    pub fn create(path: &Path, sample_rate: u32) -> hound::Result<Self> {
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        Ok(Self {
            writer: Some(WavWriter::create(path, spec)?),
            failed: false,
        })
    }

    fn fail(&mut self, err: hound::Error) {
        if !self.failed {
            log::error!("WAV write failed, dropping further audio: {}", err);
        }
        self.failed = true;
        self.writer = None;
    }
}

impl I2sOutput for WavOutput {
    fn write(&mut self, words: &[u32]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let mut result = Ok(());
        for &word in words {
            result = writer
                .write_sample(unpack_left(word))
                .and_then(|_| writer.write_sample(unpack_right(word)));
            if result.is_err() {
                break;
            }
        }
        if let Err(err) = result {
            self.fail(err);
        }
    }

    fn flush(&mut self) {
        if let Some(Err(err)) = self.writer.as_mut().map(|w| w.flush()) {
            self.fail(err);
        }
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.finalize() {
                log::error!("failed to finalize WAV file: {}", err);
            }
        }
    }
}
