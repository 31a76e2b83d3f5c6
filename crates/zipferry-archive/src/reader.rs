use std::io::{self, Cursor, Read};

use tracing::debug;

use crate::entry::ArchiveEntry;
use crate::error::{Error, LimitViolation, Result};
use crate::limits::ResourceLimits;

/// Upper bound on up-front buffer reservation when reading a whole entry.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];
const EOCD_LEN: usize = 22;
const ZIP64_LOCATOR_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x06, 0x07];
const ZIP64_LOCATOR_LEN: usize = 20;
const ZIP64_EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x06, 0x06];
const MAX_COMMENT_LEN: usize = u16::MAX as usize;

/// Returns true if `data` starts with a zip local-file or end-of-directory signature.
pub fn looks_like_zip(data: &[u8]) -> bool {
    matches!(
        data,
        [0x50, 0x4B, 0x03, 0x04, ..] | [0x50, 0x4B, 0x05, 0x06, ..] | [0x50, 0x4B, 0x07, 0x08, ..]
    )
}

/// Pull-based reader over an in-memory zip archive.
///
/// Entries come out one at a time in central-directory order through
/// [`next_entry`](Self::next_entry), which only looks at raw metadata. Entry
/// content is decompressed through [`open_entry`](Self::open_entry); every call
/// returns a fresh single-use stream, so re-reading an entry after a consumer
/// failed halfway is an explicit second open.
pub struct ZipReader<B: AsRef<[u8]>> {
    archive: zip::ZipArchive<Cursor<B>>,
    index: usize,
}

impl<B: AsRef<[u8]>> ZipReader<B> {
    pub fn open(buffer: B) -> Result<Self> {
        if !looks_like_zip(buffer.as_ref()) {
            return Err(Error::UnsupportedFormat);
        }
        let archive = zip::ZipArchive::new(Cursor::new(buffer)).map_err(Error::corrupted)?;
        debug!(entries = archive.len(), "zip central directory read");
        Ok(Self { archive, index: 0 })
    }

    /// Open `buffer`, refusing archives whose trailer declares more
    /// central-directory records than `limits` could ever admit.
    ///
    /// The record count is read from the end-of-central-directory trailer
    /// (zip64 when present) before any record is parsed.
    pub fn open_with_limits(buffer: B, limits: &ResourceLimits) -> Result<Self> {
        if !looks_like_zip(buffer.as_ref()) {
            return Err(Error::UnsupportedFormat);
        }
        if let Some(declared) = declared_record_count(buffer.as_ref()) {
            let max = limits.max_directory_records();
            if declared > max {
                return Err(LimitViolation::DirectoryRecords { declared, max }.into());
            }
            debug!(declared, max, "central directory size accepted");
        }
        Self::open(buffer)
    }

    /// Number of records in the central directory.
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    pub fn next_entry(&mut self) -> Option<Result<ArchiveEntry>> {
        if self.index >= self.archive.len() {
            return None;
        }
        let index = self.index;
        self.index += 1;

        // Raw access reads the header without touching the compressed payload.
        let file = match self.archive.by_index_raw(index) {
            Ok(f) => f,
            Err(e) => return Some(Err(Error::corrupted(e))),
        };

        let mut entry = ArchiveEntry::new(index, file.name(), file.size(), file.compressed_size());
        entry.is_directory |= file.is_dir();
        Some(Ok(entry))
    }

    /// Open a decompressing stream over `entry`, capped at its declared size.
    pub fn open_entry(&mut self, entry: &ArchiveEntry) -> Result<EntryStream<'_, B>> {
        let file = self
            .archive
            .by_index(entry.index)
            .map_err(|e| Error::ReadFailed {
                name: entry.name.clone(),
                source: e.into(),
            })?;
        Ok(EntryStream {
            inner: file,
            name: entry.name.clone(),
            declared: entry.uncompressed_size,
            read: 0,
            exceeded: false,
        })
    }

    /// Decompress `entry` into one buffer of at most its declared size.
    pub fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        let mut stream = self.open_entry(entry)?;
        let mut content = Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOC) as usize);
        match stream.read_to_end(&mut content) {
            Ok(_) => Ok(content),
            Err(source) => Err(stream.into_error(source)),
        }
    }
}

/// Single-use decompressing reader for one entry.
pub struct EntryStream<'a, B: AsRef<[u8]>> {
    inner: zip::read::ZipFile<'a, Cursor<B>>,
    name: String,
    declared: u64,
    read: u64,
    exceeded: bool,
}

impl<B: AsRef<[u8]>> EntryStream<'_, B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Whether the entry produced more bytes than its header declared.
    pub fn exceeded_declared_size(&self) -> bool {
        self.exceeded
    }

    /// Convert an I/O failure raised by this stream into an archive error.
    pub fn into_error(self, source: io::Error) -> Error {
        if self.exceeded {
            Error::SizeMismatch {
                name: self.name,
                declared: self.declared,
            }
        } else {
            Error::ReadFailed {
                name: self.name,
                source,
            }
        }
    }
}

impl<B: AsRef<[u8]>> Read for EntryStream<'_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.exceeded {
            return Err(size_exceeded());
        }
        // Ask for one byte past the declared size so a lying header is detected.
        let allowed = self.declared.saturating_add(1).saturating_sub(self.read);
        let window = buf.len().min(usize::try_from(allowed).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..window])?;
        self.read += n as u64;
        if self.read > self.declared {
            self.exceeded = true;
            return Err(size_exceeded());
        }
        Ok(n)
    }
}

fn size_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "entry exceeds its declared size")
}

/// Total record count declared by the end-of-central-directory trailer.
///
/// A saturated classic count defers to the zip64 record. `None` when no
/// trailer is found; the zip parser then reports the corruption.
fn declared_record_count(data: &[u8]) -> Option<u64> {
    let eocd = find_eocd(data)?;
    let total = read_u16(data, eocd + 10)?;
    if total != u16::MAX {
        return Some(u64::from(total));
    }
    zip64_record_count(data, eocd).or(Some(u64::from(total)))
}

fn find_eocd(data: &[u8]) -> Option<usize> {
    let last = data.len().checked_sub(EOCD_LEN)?;
    let first = last.saturating_sub(MAX_COMMENT_LEN);
    (first..=last).rev().find(|&pos| {
        data[pos..].starts_with(&EOCD_SIGNATURE)
            && read_u16(data, pos + 20)
                .is_some_and(|comment| pos + EOCD_LEN + usize::from(comment) <= data.len())
    })
}

fn zip64_record_count(data: &[u8], eocd: usize) -> Option<u64> {
    let locator = eocd.checked_sub(ZIP64_LOCATOR_LEN)?;
    if !data[locator..].starts_with(&ZIP64_LOCATOR_SIGNATURE) {
        return None;
    }
    let record = usize::try_from(read_u64(data, locator + 8)?).ok()?;
    if !data.get(record..)?.starts_with(&ZIP64_EOCD_SIGNATURE) {
        return None;
    }
    read_u64(data, record + 32)
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes: [u8; 8] = data.get(at..at.checked_add(8)?)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in files {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn detect_zip_signature() {
        assert!(looks_like_zip(&[0x50, 0x4B, 0x03, 0x04, 0x14, 0x00]));
        assert!(looks_like_zip(&[0x50, 0x4B, 0x05, 0x06]));
        assert!(!looks_like_zip(&[0x1F, 0x8B, 0x08, 0x00]));
        assert!(!looks_like_zip(&[]));
    }

    #[test]
    fn open_rejects_non_zip() {
        let result = ZipReader::open(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(matches!(result, Err(Error::UnsupportedFormat)));
    }

    #[test]
    fn open_rejects_truncated_zip() {
        let mut data = build_zip(&[("a.txt", b"hello")]);
        data.truncate(10);
        let result = ZipReader::open(data);
        assert!(matches!(result, Err(Error::Corrupted { .. })));
    }

    #[test]
    fn entries_in_central_directory_order() {
        let data = build_zip(&[("dir/", b""), ("dir/a.csv", b"x,y\n1,2\n"), ("b.txt", b"hi")]);
        let mut reader = ZipReader::open(data).unwrap();
        assert_eq!(reader.len(), 3);

        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry() {
            names.push(entry.unwrap());
        }
        assert_eq!(names[0].name, "dir/");
        assert!(names[0].is_directory);
        assert_eq!(names[1].name, "dir/a.csv");
        assert_eq!(names[1].uncompressed_size, 8);
        assert_eq!(names[2].index, 2);
        assert!(reader.next_entry().is_none());
    }

    #[test]
    fn open_entry_twice_yields_fresh_streams() {
        let data = build_zip(&[("a.txt", b"hello world")]);
        let mut reader = ZipReader::open(data).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();

        {
            let mut stream = reader.open_entry(&entry).unwrap();
            let mut partial = [0u8; 5];
            stream.read_exact(&mut partial).unwrap();
            assert_eq!(&partial, b"hello");
        }

        assert_eq!(reader.read_entry(&entry).unwrap(), b"hello world");
    }

    #[test]
    fn stream_counts_bytes() {
        let data = build_zip(&[("a.txt", b"0123456789")]);
        let mut reader = ZipReader::open(data).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        let mut stream = reader.open_entry(&entry).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(stream.bytes_read(), 10);
        assert!(!stream.exceeded_declared_size());
    }

    /// Overwrite the classic trailer's record counts of an archive without a comment.
    fn declare_records(data: &mut [u8], records: u16) {
        let eocd = data.len() - EOCD_LEN;
        assert!(data[eocd..].starts_with(&EOCD_SIGNATURE));
        data[eocd + 8..eocd + 10].copy_from_slice(&records.to_le_bytes());
        data[eocd + 10..eocd + 12].copy_from_slice(&records.to_le_bytes());
    }

    #[test]
    fn record_count_read_from_trailer() {
        let data = build_zip(&[("a.txt", b"a"), ("b.txt", b"b"), ("c/", b"")]);
        assert_eq!(declared_record_count(&data), Some(3));
        assert_eq!(declared_record_count(&data[..10]), None);
    }

    #[test]
    fn record_count_prefers_zip64_trailer() {
        let mut data = Vec::new();
        // zip64 end-of-central-directory record at offset 0
        data.extend_from_slice(&ZIP64_EOCD_SIGNATURE);
        data.extend_from_slice(&44u64.to_le_bytes());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&1_000_000u64.to_le_bytes());
        data.extend_from_slice(&1_000_000u64.to_le_bytes());
        data.extend_from_slice(&[0u8; 16]);
        // locator
        data.extend_from_slice(&ZIP64_LOCATOR_SIGNATURE);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        // classic trailer with saturated fields
        data.extend_from_slice(&EOCD_SIGNATURE);
        data.extend_from_slice(&[0xFF; 16]);
        data.extend_from_slice(&0u16.to_le_bytes());

        assert_eq!(declared_record_count(&data), Some(1_000_000));
    }

    #[test]
    fn open_with_limits_rejects_oversized_directory() {
        let mut data = build_zip(&[("a.txt", b"hello")]);
        declare_records(&mut data, 60_000);

        let result = ZipReader::open_with_limits(data, &ResourceLimits::default());
        match result {
            Err(Error::Limit(LimitViolation::DirectoryRecords { declared, max })) => {
                assert_eq!(declared, 60_000);
                assert_eq!(max, 40_000);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("oversized directory was accepted"),
        }
    }

    #[test]
    fn open_with_limits_counts_skippable_records() {
        let dirs: Vec<String> = (0..9).map(|i| format!("d{i}/")).collect();
        let files: Vec<(&str, &[u8])> = dirs.iter().map(|d| (d.as_str(), &b""[..])).collect();
        let data = build_zip(&files);
        let limits = ResourceLimits::default().max_entry_count(2);

        assert!(matches!(
            ZipReader::open_with_limits(data.clone(), &limits),
            Err(Error::Limit(LimitViolation::DirectoryRecords { declared: 9, max: 8 }))
        ));
        let reader = ZipReader::open_with_limits(data, &limits.max_entry_count(3)).unwrap();
        assert_eq!(reader.len(), 9);
    }

    #[test]
    fn empty_archive_has_no_entries() {
        let data = build_zip(&[]);
        let mut reader = ZipReader::open(data).unwrap();
        assert!(reader.is_empty());
        assert!(reader.next_entry().is_none());
    }
}
