//! SFTP transfers with progress reporting.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use ssh2::Session;

/// Bytes moved per read/write round.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Copy `reader` into `writer` in [`CHUNK_SIZE`] chunks, reporting
/// `(transferred, total)` after every chunk. An empty source still reports
/// once.
pub fn copy_with_progress<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    mut progress: F,
) -> std::io::Result<u64>
where
    R: Read,
    W: Write,
    F: FnMut(u64, u64),
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        transferred += n as u64;
        progress(transferred, total);
    }
    if transferred == 0 {
        progress(0, total);
    }
    writer.flush()?;
    Ok(transferred)
}

/// Logs upload progress each time another 10% is crossed.
#[derive(Debug)]
pub struct ProgressLog {
    last_decile: u64,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self { last_decile: 0 }
    }

    /// Record progress; returns the percentage when a new 10% step was
    /// reached and logged.
    pub fn update(&mut self, transferred: u64, total: u64) -> Option<f64> {
        let percent = percent(transferred, total);
        let decile = (percent / 10.0).floor() as u64;
        if decile <= self.last_decile {
            return None;
        }
        self.last_decile = decile;
        tracing::debug!(transferred, total, "Upload progress: {percent:.2}%");
        Some(percent)
    }
}

impl Default for ProgressLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentage of `total` covered by `transferred`. An empty file counts as
/// fully transferred.
pub fn percent(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    transferred as f64 / total as f64 * 100.0
}

/// Upload `local` to `remote` over SFTP. Returns the bytes written.
pub fn upload<F>(session: &Session, local: &Path, remote: &str, progress: F) -> std::io::Result<u64>
where
    F: FnMut(u64, u64),
{
    let mut source = File::open(local)?;
    let total = source.metadata()?.len();
    let sftp = session.sftp()?;
    let mut dest = sftp.create(Path::new(remote))?;
    copy_with_progress(&mut source, &mut dest, total, progress)
}

/// Outcome of a download attempt that did not hit an I/O error.
#[derive(Debug, PartialEq, Eq)]
pub enum Download {
    Copied(u64),
    /// The remote file does not exist.
    Missing,
}

/// Download `remote` over SFTP into `local`.
pub fn download(session: &Session, remote: &str, local: &Path) -> std::io::Result<Download> {
    let sftp = session.sftp()?;
    let remote_path = Path::new(remote);
    if sftp.stat(remote_path).is_err() {
        return Ok(Download::Missing);
    }

    let mut source = sftp.open(remote_path)?;
    let mut dest = File::create(local)?;
    let bytes = std::io::copy(&mut source, &mut dest)?;
    dest.flush()?;
    Ok(Download::Copied(bytes))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn copy_reports_progress_per_chunk() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let mut reader = Cursor::new(data.clone());
        let mut writer = Vec::new();
        let mut reports = Vec::new();

        let copied = copy_with_progress(&mut reader, &mut writer, data.len() as u64, |t, total| {
            reports.push((t, total));
        })
        .expect("copy");

        assert_eq!(copied, data.len() as u64);
        assert_eq!(writer, data);
        assert_eq!(reports.last(), Some(&(data.len() as u64, data.len() as u64)));
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn empty_source_reports_progress_once() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let mut writer = Vec::new();
        let mut reports = Vec::new();

        let copied = copy_with_progress(&mut reader, &mut writer, 0, |t, total| {
            reports.push((t, total));
        })
        .expect("copy");

        assert_eq!(copied, 0);
        assert_eq!(reports, vec![(0, 0)]);

        let mut log = ProgressLog::new();
        assert_eq!(log.update(0, 0), Some(100.0));
    }

    #[test]
    fn percent_handles_empty_file() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(50, 200), 25.0);
    }

    #[test]
    fn progress_log_reports_each_decile_once() {
        let mut log = ProgressLog::new();
        assert_eq!(log.update(5, 100), None);
        assert_eq!(log.update(10, 100), Some(10.0));
        assert_eq!(log.update(15, 100), None);
        assert_eq!(log.update(35, 100), Some(35.0));
        assert_eq!(log.update(100, 100), Some(100.0));
        assert_eq!(log.update(100, 100), None);
    }
}
