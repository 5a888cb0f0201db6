//! Per-channel writer tasks.
//!
//! Each channel gets one thread running [`write_channel`]: open the output
//! file fresh, then append every block popped from the queue, in pop order,
//! until the queue reports closed-and-empty. A channel whose file cannot be
//! opened is sacrificed on its own - its queue is still consumed (and
//! discarded) so the rest of the capture is unaffected.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byte_slice_cast::AsByteSlice;
use thiserror::Error;
use tracing::{debug, error};

use crate::queue::BlockReceiver;
use crate::SAMPLE_BYTES;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("could not open {path}: {source}")]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("write to {path} failed: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Consume the queue to completion without persisting anything
fn discard_remaining(queue: &BlockReceiver) -> u64 {
    let mut lost = 0u64;
    while let Some(block) = queue.pop() {
        lost += block.num_samples() as u64;
    }
    lost
}

/// Drain one channel's queue to its output file. Returns bytes written.
/// Only whole blocks (and therefore whole samples) ever reach the file.
pub fn write_channel(queue: BlockReceiver, path: &Path) -> Result<u64, WriterError> {
    let file = match File::create(path) {
        Ok(f) => f,
        Err(source) => {
            let lost = discard_remaining(&queue);
            error!(
                path = %path.display(),
                lost_samples = lost,
                "channel output could not be opened, discarding its samples"
            );
            return Err(WriterError::FileOpen {
                path: path.into(),
                source,
            });
        }
    };

    let mut out = BufWriter::new(file);
    let mut bytes = 0u64;
    while let Some(block) = queue.pop() {
        if let Err(source) = out.write_all(block.floats().as_byte_slice()) {
            let lost = discard_remaining(&queue);
            error!(
                path = %path.display(),
                lost_samples = lost,
                "write failed mid-capture, discarding the rest of this channel"
            );
            return Err(WriterError::Io {
                path: path.into(),
                source,
            });
        }
        bytes += (block.num_samples() * SAMPLE_BYTES) as u64;
    }
    out.flush().map_err(|source| WriterError::Io {
        path: path.into(),
        source,
    })?;
    debug!(path = %path.display(), bytes, "channel file complete");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::block_queue;
    use crate::SampleBlock;

    #[test]
    fn writes_blocks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chan.dat");
        let (mut tx, rx) = block_queue();
        let mut expected = Vec::new();
        for i in 0..4 {
            let data: Vec<f32> = (0..8).map(|j| (i * 8 + j) as f32).collect();
            expected.extend_from_slice(data.as_byte_slice());
            tx.push(SampleBlock::from_interleaved(data));
        }
        tx.close();

        let bytes = write_channel(rx, &path).unwrap();
        assert_eq!(bytes, expected.len() as u64);
        assert_eq!(std::fs::read(&path).unwrap(), expected);
        assert_eq!(bytes as usize % SAMPLE_BYTES, 0);
    }

    #[test]
    fn empty_capture_leaves_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chan.dat");
        let (mut tx, rx) = block_queue();
        tx.close();
        assert_eq!(write_channel(rx, &path).unwrap(), 0);
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
    }

    #[test]
    fn open_failure_drains_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/chan.dat");
        let (mut tx, rx) = block_queue();
        tx.push(SampleBlock::from_interleaved(vec![1.0, 2.0]));
        tx.close();
        match write_channel(rx, &path) {
            Err(WriterError::FileOpen { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected FileOpen error, got {other:?}"),
        }
    }
}
