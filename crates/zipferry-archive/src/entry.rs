/// One record of the archive's central directory.
///
/// Produced by [`ZipReader::next_entry`](crate::ZipReader::next_entry) from raw
/// metadata only; reading it never decompresses anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: usize,
    pub name: String,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub is_directory: bool,
}

impl ArchiveEntry {
    pub fn new(index: usize, name: impl Into<String>, uncompressed_size: u64, compressed_size: u64) -> Self {
        let name = name.into();
        let is_directory = name.ends_with('/') || name.ends_with('\\');
        Self {
            index,
            name,
            uncompressed_size,
            compressed_size,
            is_directory,
        }
    }

    /// Directories and zero-byte entries carry nothing to publish.
    pub fn is_skippable(&self) -> bool {
        self.is_directory || self.uncompressed_size == 0
    }

    /// Uncompressed-to-compressed ratio, treating an empty payload as one byte.
    pub fn compression_ratio(&self) -> f64 {
        self.uncompressed_size as f64 / self.compressed_size.max(1) as f64
    }

    /// File name without any directory prefix.
    pub fn file_name(&self) -> &str {
        self.name
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .unwrap_or(&self.name)
    }

    /// Lowercased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        let file_name = self.file_name();
        file_name
            .rfind('.')
            .filter(|&i| i > 0 && i + 1 < file_name.len())
            .map(|i| file_name[i + 1..].to_ascii_lowercase())
    }
}
