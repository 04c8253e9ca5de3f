//! Append-only step log — binary protobuf frames.
//!
//! Storage format: length-prefixed protobuf frames.
//!   [4-byte LE length][protobuf bytes][4-byte LE length][protobuf bytes]...
//!
//! Rules:
//!   - Strict append only: frames are never rewritten or reordered
//!   - fsync after every write
//!   - Step numbers strictly increasing (validated on append)
//!   - Only committed steps are appended

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use prost::Message;
use tracing::debug;

use realm_engine::StepEnvelope;

use crate::error::{Result, RuntimeError};
use crate::proto_bridge::{proto_to_step, step_to_proto};
use crate::proto_types::ProtoStepEnvelope;

/// Frames above this size are treated as corruption.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Append-only step log backed by a binary file.
pub struct StepLog {
    path: PathBuf,
    last_step: u64,
}

impl StepLog {
    /// Open or create a step log at the given path.
    /// Reads existing frames to determine the last step number.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let last_step = if path.exists() {
            let frames = Self::read_all_from_file(path)?;
            frames.last().map(|f| f.step).unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            path: path.to_path_buf(),
            last_step,
        })
    }

    /// Append one committed step. Writes a length-prefixed frame and fsyncs.
    pub fn append(&mut self, step: &StepEnvelope) -> Result<()> {
        let expected = self.last_step + 1;
        if step.step != expected {
            return Err(RuntimeError::StepLog(format!(
                "Sequence violation in step log: expected {}, got {}",
                expected, step.step
            )));
        }

        let buf = step_to_proto(step).encode_to_vec();
        let len = u32::try_from(buf.len())
            .map_err(|_| RuntimeError::StepLog(format!("frame of {} bytes is too large", buf.len())))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        {
            let mut writer = BufWriter::new(&mut file);
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&buf)?;
            writer.flush()?;
        }
        file.sync_all()?;

        self.last_step = step.step;
        debug!(step = step.step, bytes = buf.len(), "appended step frame");
        Ok(())
    }

    /// Load every step in log order.
    pub fn load_all(&self) -> Result<Vec<StepEnvelope>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Self::read_all_from_file(&self.path)?
            .iter()
            .map(proto_to_step)
            .collect()
    }

    /// Steps strictly after `step`, for replay on top of a snapshot.
    pub fn load_after(&self, step: u64) -> Result<Vec<StepEnvelope>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|s| s.step > step)
            .collect())
    }

    pub fn last_step(&self) -> u64 {
        self.last_step
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all frames from a file, validating frame integrity.
    fn read_all_from_file(path: &Path) -> Result<Vec<ProtoStepEnvelope>> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut frames = Vec::new();
        let mut len_buf = [0u8; 4];

        loop {
            match read_prefix(&mut reader, &mut len_buf)? {
                0 => break,
                4 => {}
                n => {
                    return Err(RuntimeError::Decode(format!(
                        "Truncated frame length: {} of 4 bytes",
                        n
                    )))
                }
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                return Err(RuntimeError::Decode(format!("Invalid frame length: {}", len)));
            }

            let mut frame = vec![0u8; len];
            reader
                .read_exact(&mut frame)
                .map_err(|e| RuntimeError::Decode(format!("Truncated frame: {}", e)))?;

            frames.push(ProtoStepEnvelope::decode(frame.as_slice())?);
        }

        Ok(frames)
    }
}

/// Fill `buf` unless the stream ends first. Returns the bytes read.
fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
