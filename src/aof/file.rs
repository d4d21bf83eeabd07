//! File-Backed Append-Only Log
//!
//! The log file is a bare concatenation of RESP array-of-bulk-string frames,
//! one per mutation, encoded by the same codec the wire uses. Three pieces
//! live here:
//!
//! - [`FileAof`]: buffered appends, explicit fsync, idempotent close, and the
//!   install half of the online rewrite.
//! - [`write_rewrite_temp`]: serializes a store snapshot to a sibling
//!   `<live>.tmp` file (`SET key value` plus `EXPIREAT key secs` for entries
//!   with a deadline), fsyncs it, and hands back the path.
//! - [`replay`]: streams frames out of a log and applies them, tolerating a
//!   truncated final frame (the normal shape of a crash mid-append) while
//!   treating malformed bytes mid-file as corruption.

use crate::aof::{AofError, Record};
use crate::protocol::{RespParser, RespValue};
use crate::storage::SnapshotEntry;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

const WRITE_BUF_SIZE: usize = 64 * 1024;

/// The file-backed append-only log.
///
/// All mutating methods take `&mut self`; callers serialize access through
/// the [`AofPipeline`](crate::aof::AofPipeline) mutex so a frame is never
/// interleaved mid-write with another frame or with a rewrite install.
#[derive(Debug)]
pub struct FileAof {
    path: PathBuf,
    /// `None` once closed; every operation checks this first.
    writer: Option<BufWriter<File>>,
}

impl FileAof {
    /// Opens (creating if necessary) the log at `path` for appending.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AofError> {
        let path = path.into();

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), "append-only file opened");

        Ok(Self {
            path,
            writer: Some(BufWriter::with_capacity(WRITE_BUF_SIZE, file)),
        })
    }

    /// The live log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one `[cmd, args...]` frame and flushes the user-space buffer.
    ///
    /// Does NOT fsync; durability scheduling belongs to the fsync policy.
    pub async fn append(&mut self, cmd: &str, args: &[Bytes]) -> Result<(), AofError> {
        let writer = self.writer.as_mut().ok_or(AofError::Closed)?;

        let frame = RespValue::command(cmd, args).serialize();
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Flushes buffered data and fsyncs the file.
    pub async fn sync(&mut self) -> Result<(), AofError> {
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => return Ok(()),
        };

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        Ok(())
    }

    /// Flushes, fsyncs, and closes the log. Idempotent.
    pub async fn close(&mut self) -> Result<(), AofError> {
        let mut writer = match self.writer.take() {
            Some(w) => w,
            None => return Ok(()),
        };

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        Ok(())
    }

    /// Installs a finished rewrite: swaps `tmp` in as the live log and
    /// appends every tail record captured while the rewrite ran, in FIFO
    /// order.
    ///
    /// The swap is remove-then-rename so it also works on platforms where
    /// renaming over an existing file fails.
    pub async fn install_rewrite(&mut self, tmp: &Path, tail: &[Record]) -> Result<(), AofError> {
        let mut old = self.writer.take().ok_or(AofError::Closed)?;

        // Close the live file before the swap.
        old.flush().await?;
        drop(old);

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::rename(tmp, &self.path).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.writer = Some(BufWriter::with_capacity(WRITE_BUF_SIZE, file));

        for record in tail {
            self.append(&record.cmd, &record.args).await?;
        }

        info!(
            path = %self.path.display(),
            tail = tail.len(),
            "rewritten append-only file installed"
        );
        Ok(())
    }
}

/// Path of the rewrite temp file that sits next to `live`.
pub fn rewrite_temp_path(live: &Path) -> PathBuf {
    let mut name = live.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes a compacted log for `snapshot` to `<live>.tmp`.
///
/// Each entry becomes `SET key value`, followed by `EXPIREAT key unix_secs`
/// when the entry carries a deadline. The temp file is flushed, fsynced, and
/// closed before the path is returned; a failure removes it.
pub async fn write_rewrite_temp(
    live: &Path,
    snapshot: &[SnapshotEntry],
) -> Result<PathBuf, AofError> {
    let tmp_path = rewrite_temp_path(live);

    let result = write_snapshot_frames(&tmp_path, snapshot).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result?;

    debug!(
        tmp = %tmp_path.display(),
        entries = snapshot.len(),
        "rewrite temp file written"
    );
    Ok(tmp_path)
}

async fn write_snapshot_frames(tmp_path: &Path, snapshot: &[SnapshotEntry]) -> Result<(), AofError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(tmp_path)
        .await?;
    let mut writer = BufWriter::with_capacity(WRITE_BUF_SIZE, file);

    let mut buf = Vec::new();
    for entry in snapshot {
        buf.clear();
        RespValue::command("SET", &[entry.key.clone(), entry.value.clone()])
            .serialize_into(&mut buf);
        if let Some(unix_secs) = entry.expires_at_unix {
            RespValue::command(
                "EXPIREAT",
                &[entry.key.clone(), Bytes::from(unix_secs.to_string())],
            )
            .serialize_into(&mut buf);
        }
        writer.write_all(&buf).await?;
    }

    writer.flush().await?;
    writer.get_ref().sync_all().await?;
    Ok(())
}

/// Replays the log at `path`, calling `apply(cmd, args)` for every entry.
///
/// An absent file is not an error: there is nothing to replay. A truncated
/// final frame — or a structurally invalid entry with no bytes after it —
/// ends replay successfully, applying exactly the complete frames before it.
/// Anything malformed with more bytes behind it is corruption and fails.
pub async fn replay<F>(path: &Path, mut apply: F) -> Result<(), AofError>
where
    F: FnMut(&str, &[Bytes]),
{
    let buf = match tokio::fs::read(path).await {
        Ok(buf) => buf,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut parser = RespParser::new();
    let mut offset = 0;
    let mut applied = 0u64;

    while offset < buf.len() {
        match parser.parse(&buf[offset..]) {
            Ok(Some((frame, consumed))) => {
                match decode_entry(&frame) {
                    Some((cmd, args)) => apply(&cmd, &args),
                    None => {
                        // Tolerate an invalid entry only at the very end of
                        // the file, the same way a truncated frame is.
                        if offset + consumed >= buf.len() {
                            break;
                        }
                        return Err(AofError::InvalidEntry { offset });
                    }
                }
                applied += 1;
                offset += consumed;
            }
            // Incomplete frame at the tail: a crash mid-append. Stop here.
            Ok(None) => break,
            Err(source) => return Err(AofError::Corrupt { offset, source }),
        }
    }

    debug!(path = %path.display(), applied, "append-only file replayed");
    Ok(())
}

/// Extracts `(cmd, args)` from a log frame: a non-empty array whose elements
/// are all non-null bulk strings.
fn decode_entry(frame: &RespValue) -> Option<(String, Vec<Bytes>)> {
    let items = frame.as_array()?;
    if items.is_empty() {
        return None;
    }

    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RespValue::BulkString(Some(b)) => parts.push(b.clone()),
            _ => return None,
        }
    }

    let cmd = String::from_utf8(parts[0].to_vec()).ok()?;
    Some((cmd, parts.split_off(1)))
}
