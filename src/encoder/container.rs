//! On-disk container for encoded recordings
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! "PLCV" | version u16 | header_len u32 | header (msgpack)
//! { track u8 | pts_us u64 | len u32 | payload }*
//! footer (msgpack) | footer_len u64 | "PLCE"
//! ```
//!
//! Records are written in presentation order across all tracks. The footer
//! carries the index, so readers can seek straight to any record.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::data::{DeveloperMetadata, PixelFormat, Track};
use crate::error::{is_storage_full, CaptureError};

const MAGIC: &[u8; 4] = b"PLCV";
const END_MAGIC: &[u8; 4] = b"PLCE";
const VERSION: u16 = 1;
const RECORD_HEADER_LEN: u64 = 1 + 8 + 4;
const TRAILER_LEN: u64 = 8 + 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoTrackInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Location of one record's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub track: Track,
    pub pts_us: u64,
    pub offset: u64,
    pub len: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerFooter {
    pub duration_us: u64,
    pub video: Option<VideoTrackInfo>,
    pub face_cam: Option<VideoTrackInfo>,
    pub audio: Option<AudioTrackInfo>,
    pub index: Vec<IndexEntry>,
    pub metadata: DeveloperMetadata,
    pub late_dropped: u64,
}

/// Counts and hashes every byte on its way to disk
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Sequential writer for one container file
pub struct ContainerWriter {
    out: HashingWriter<BufWriter<File>>,
    max_bytes: u64,
}

impl ContainerWriter {
    /// Create the file and write the header
    ///
    /// `max_bytes` of zero means no storage budget.
    pub fn create(path: &Path, header: &ContainerHeader, max_bytes: u64) -> Result<Self, CaptureError> {
        let file = File::create(path).map_err(map_io)?;
        let mut writer = Self {
            out: HashingWriter {
                inner: BufWriter::new(file),
                hasher: Sha256::new(),
                written: 0,
            },
            max_bytes,
        };

        let header_bytes = rmp_serde::to_vec_named(header)
            .map_err(|e| CaptureError::Encoder(format!("header serialization: {}", e)))?;
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(&header_bytes)?;
        Ok(writer)
    }

    /// Append a record; returns the index entry pointing at its payload
    pub fn write_record(&mut self, track: Track, pts_us: u64, payload: &[u8]) -> Result<IndexEntry, CaptureError> {
        let needed = RECORD_HEADER_LEN + payload.len() as u64;
        if self.max_bytes > 0 && self.out.written + needed > self.max_bytes {
            return Err(CaptureError::StorageExhausted(format!(
                "recording would exceed {} bytes",
                self.max_bytes
            )));
        }

        self.write_all(&[track as u8])?;
        self.write_all(&pts_us.to_le_bytes())?;
        self.write_all(&(payload.len() as u32).to_le_bytes())?;
        let offset = self.out.written;
        self.write_all(payload)?;

        Ok(IndexEntry {
            track,
            pts_us,
            offset,
            len: payload.len() as u32,
        })
    }

    /// Write the footer and flush; returns (file size, hex SHA-256)
    pub fn finish(mut self, footer: &ContainerFooter) -> Result<(u64, String), CaptureError> {
        let footer_bytes = rmp_serde::to_vec_named(footer)
            .map_err(|e| CaptureError::Encoder(format!("footer serialization: {}", e)))?;
        self.write_all(&footer_bytes)?;
        self.write_all(&(footer_bytes.len() as u64).to_le_bytes())?;
        self.write_all(END_MAGIC)?;
        self.out.flush().map_err(map_io)?;
        self.out.inner.get_ref().sync_all().map_err(map_io)?;

        let size = self.out.written;
        let checksum = hex::encode(self.out.hasher.finalize());
        Ok((size, checksum))
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), CaptureError> {
        self.out.write_all(bytes).map_err(map_io)
    }
}

fn map_io(err: io::Error) -> CaptureError {
    if is_storage_full(&err) {
        CaptureError::StorageExhausted(err.to_string())
    } else {
        CaptureError::Io(err)
    }
}

/// Random-access reader over a finished container
pub struct ContainerReader {
    file: BufReader<File>,
    header: ContainerHeader,
    footer: ContainerFooter,
}

impl ContainerReader {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let mut file = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(CaptureError::UnsupportedSample("not a playcast recording".into()));
        }
        let mut version = [0u8; 2];
        file.read_exact(&mut version)?;
        if u16::from_le_bytes(version) != VERSION {
            return Err(CaptureError::UnsupportedSample(format!(
                "unsupported container version {}",
                u16::from_le_bytes(version)
            )));
        }
        let mut len = [0u8; 4];
        file.read_exact(&mut len)?;
        let mut header_bytes = vec![0u8; u32::from_le_bytes(len) as usize];
        file.read_exact(&mut header_bytes)?;
        let header: ContainerHeader = rmp_serde::from_slice(&header_bytes)
            .map_err(|e| CaptureError::UnsupportedSample(format!("corrupt header: {}", e)))?;

        let file_len = file.seek(SeekFrom::End(0))?;
        if file_len < TRAILER_LEN {
            return Err(CaptureError::UnsupportedSample("truncated recording".into()));
        }
        file.seek(SeekFrom::Start(file_len - TRAILER_LEN))?;
        let mut footer_len = [0u8; 8];
        file.read_exact(&mut footer_len)?;
        let mut end_magic = [0u8; 4];
        file.read_exact(&mut end_magic)?;
        if &end_magic != END_MAGIC {
            return Err(CaptureError::UnsupportedSample("recording was not finalized".into()));
        }

        let footer_len = u64::from_le_bytes(footer_len);
        let footer_start = file_len
            .checked_sub(TRAILER_LEN + footer_len)
            .ok_or_else(|| CaptureError::UnsupportedSample("corrupt footer length".into()))?;
        file.seek(SeekFrom::Start(footer_start))?;
        let mut footer_bytes = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer_bytes)?;
        let footer: ContainerFooter = rmp_serde::from_slice(&footer_bytes)
            .map_err(|e| CaptureError::UnsupportedSample(format!("corrupt footer: {}", e)))?;

        Ok(Self {
            file,
            header,
            footer,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn footer(&self) -> &ContainerFooter {
        &self.footer
    }

    /// Index entries of one track, in presentation order
    pub fn entries(&self, track: Track) -> impl Iterator<Item = &IndexEntry> {
        self.footer.index.iter().filter(move |entry| entry.track == track)
    }

    pub fn read_payload(&mut self, entry: &IndexEntry) -> Result<Vec<u8>, CaptureError> {
        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut payload = vec![0u8; entry.len as usize];
        self.file.read_exact(&mut payload)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> ContainerHeader {
        ContainerHeader {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    fn footer(index: Vec<IndexEntry>) -> ContainerFooter {
        ContainerFooter {
            duration_us: 1_000,
            video: None,
            face_cam: None,
            audio: Some(AudioTrackInfo {
                sample_rate: 8_000,
                channels: 1,
            }),
            index,
            metadata: DeveloperMetadata::new(),
            late_dropped: 0,
        }
    }

    #[test]
    fn reader_finds_payloads_through_footer_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.playcast");
        let header = header();

        let mut writer = ContainerWriter::create(&path, &header, 0).unwrap();
        let first = writer.write_record(Track::Audio, 0, b"hello").unwrap();
        let second = writer.write_record(Track::Audio, 500, b"world!").unwrap();
        let (size, checksum) = writer.finish(&footer(vec![first, second])).unwrap();

        assert_eq!(size, std::fs::metadata(&path).unwrap().len());
        let on_disk = hex::encode(Sha256::digest(std::fs::read(&path).unwrap()));
        assert_eq!(checksum, on_disk);

        let mut reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.header().session_id, header.session_id);
        let entries: Vec<IndexEntry> = reader.entries(Track::Audio).copied().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(reader.read_payload(&entries[1]).unwrap(), b"world!");
    }

    #[test]
    fn storage_budget_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.playcast");
        let mut writer = ContainerWriter::create(&path, &header(), 128).unwrap();

        let err = writer.write_record(Track::Video, 0, &[0u8; 256]).unwrap_err();
        assert!(matches!(err, CaptureError::StorageExhausted(_)));
    }

    #[test]
    fn unfinished_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.playcast");
        let mut writer = ContainerWriter::create(&path, &header(), 0).unwrap();
        writer.write_record(Track::Audio, 0, b"partial").unwrap();
        drop(writer);

        assert!(ContainerReader::open(&path).is_err());
    }
}
