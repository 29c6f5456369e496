//! Binary storage for the catalog.
//!
//! File format: catalog.bin
//!
//! Header (48 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - normalized: u8 (1 if embeddings were L2-normalized)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, in catalog position order):
//! - identifier, short_name, label, description, namespace:
//!   each a u32 byte length (little-endian) followed by UTF-8 bytes
//! - embedding: [f32; dimensions] (little-endian)
//!
//! Trailer:
//! - body_checksum: u32 (CRC32 of all entry bytes)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, CatalogError, CatalogItem, NamespaceTable};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + normalized(1) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 48;

/// Upper bound for a single metadata string; larger lengths mean corruption.
const MAX_FIELD_LEN: u32 = 1 << 20;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: catalog was built with a different embedding model")]
    ModelMismatch,

    #[error("Normalization mismatch: catalog normalized={stored}, configured normalized={configured}")]
    NormalizationMismatch { stored: bool, configured: bool },

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Catalog too large to store: {0}")]
    TooLarge(String),

    #[error("Invalid catalog data: {0}")]
    Catalog(#[from] CatalogError),
}

/// Storage manager for the persisted catalog.
pub struct CatalogStorage {
    path: PathBuf,
}

impl CatalogStorage {
    /// Create a new storage manager for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the storage file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the storage file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the catalog from storage.
    ///
    /// # Arguments
    /// * `expected_model_id` - SHA256 hash of the expected model name
    /// * `expected_dimensions` - Embedding dimensions of the configured model
    /// * `normalized` - Normalization setting queries will be embedded with
    /// * `namespaces` - Namespace table the catalog is bound to
    ///
    /// # Returns
    /// A complete catalog, or an error. Nothing is partially loaded.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
        normalized: bool,
        namespaces: NamespaceTable,
    ) -> Result<Catalog, CatalogStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        validate_header(&header, expected_model_id, expected_dimensions, normalized)?;

        let mut body = ChecksumReader::new(&mut reader);
        let mut items = Vec::with_capacity(header.entry_count.min(1 << 16) as usize);
        for _ in 0..header.entry_count {
            items.push(read_entry(&mut body, header.dimensions as usize)?);
        }
        let computed = body.finalize();

        let mut trailer = [0u8; 4];
        reader.read_exact(&mut trailer)?;
        if u32::from_le_bytes(trailer) != computed {
            return Err(CatalogStorageError::ChecksumMismatch);
        }

        Ok(Catalog::new(items, namespaces)?)
    }

    /// Save the catalog to storage.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(
        &self,
        catalog: &Catalog,
        model_id: &[u8; 32],
        normalized: bool,
    ) -> Result<(), CatalogStorageError> {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, catalog, model_id, normalized);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        catalog: &Catalog,
        model_id: &[u8; 32],
        normalized: bool,
    ) -> Result<(), CatalogStorageError> {
        let dimensions = catalog.dimensions().unwrap_or(0);
        let dimensions = u16::try_from(dimensions)
            .map_err(|_| CatalogStorageError::TooLarge(format!("{} dimensions", dimensions)))?;

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            normalized,
            dimensions,
            entry_count: catalog.len() as u64,
        };
        write_header(&mut writer, &header)?;

        let mut body = ChecksumWriter::new(&mut writer);
        for item in catalog.items() {
            write_entry(&mut body, item)?;
        }
        let checksum = body.finalize();
        writer.write_all(&checksum.to_le_bytes())?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(())
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    normalized: bool,
    dimensions: u16,
    entry_count: u64,
}

fn read_header<R: Read>(reader: &mut R) -> Result<Header, CatalogStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CatalogStorageError::InvalidFormat("file shorter than header".to_string())
        } else {
            e.into()
        }
    })?;

    let version = header_bytes[0];
    if version > FORMAT_VERSION {
        return Err(CatalogStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([
        header_bytes[44],
        header_bytes[45],
        header_bytes[46],
        header_bytes[47],
    ]);
    let computed_checksum = crc32fast::hash(&header_bytes[0..44]);
    if stored_checksum != computed_checksum {
        return Err(CatalogStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let normalized = match header_bytes[33] {
        0 => false,
        1 => true,
        other => {
            return Err(CatalogStorageError::InvalidFormat(format!(
                "normalized flag must be 0 or 1, got {}",
                other
            )))
        }
    };

    let dimensions = u16::from_le_bytes([header_bytes[34], header_bytes[35]]);
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[36..44]);
    let entry_count = u64::from_le_bytes(count_bytes);

    Ok(Header {
        version,
        model_id,
        normalized,
        dimensions,
        entry_count,
    })
}

fn validate_header(
    header: &Header,
    expected_model_id: &[u8; 32],
    expected_dimensions: usize,
    normalized: bool,
) -> Result<(), CatalogStorageError> {
    if header.model_id != *expected_model_id {
        return Err(CatalogStorageError::ModelMismatch);
    }

    if header.normalized != normalized {
        return Err(CatalogStorageError::NormalizationMismatch {
            stored: header.normalized,
            configured: normalized,
        });
    }

    // an empty catalog carries no dimensions
    if header.entry_count > 0 && header.dimensions as usize != expected_dimensions {
        return Err(CatalogStorageError::DimensionMismatch {
            expected: expected_dimensions,
            got: header.dimensions as usize,
        });
    }

    Ok(())
}

fn write_header<W: Write>(writer: &mut W, header: &Header) -> Result<(), CatalogStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = header.version;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33] = u8::from(header.normalized);
    header_bytes[34..36].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[36..44].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..44]);
    header_bytes[44..48].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn read_entry<R: Read>(reader: &mut R, dimensions: usize) -> Result<CatalogItem, CatalogStorageError> {
    let identifier = read_string(reader)?;
    let short_name = read_string(reader)?;
    let label = read_string(reader)?;
    let description = read_string(reader)?;
    let namespace = read_string(reader)?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut float_bytes = [0u8; 4];
        reader.read_exact(&mut float_bytes)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    Ok(CatalogItem {
        identifier,
        short_name,
        label,
        description,
        namespace,
        embedding,
    })
}

fn write_entry<W: Write>(writer: &mut W, item: &CatalogItem) -> Result<(), CatalogStorageError> {
    for field in [
        &item.identifier,
        &item.short_name,
        &item.label,
        &item.description,
        &item.namespace,
    ] {
        write_string(writer, field)?;
    }

    for &value in &item.embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, CatalogStorageError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FIELD_LEN {
        return Err(CatalogStorageError::InvalidFormat(format!(
            "field length {} exceeds limit",
            len
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| CatalogStorageError::InvalidFormat("field is not valid UTF-8".to_string()))
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<(), CatalogStorageError> {
    let len = u32::try_from(value.len())
        .ok()
        .filter(|len| *len <= MAX_FIELD_LEN)
        .ok_or_else(|| CatalogStorageError::TooLarge(format!("field of {} bytes", value.len())))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

/// Reader that feeds every byte it yields into a CRC32 hasher.
struct ChecksumReader<'a, R> {
    inner: &'a mut R,
    hasher: crc32fast::Hasher,
}

impl<'a, R: Read> ChecksumReader<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for ChecksumReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Writer that feeds every byte it accepts into a CRC32 hasher.
struct ChecksumWriter<'a, W> {
    inner: &'a mut W,
    hasher: crc32fast::Hasher,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<W: Write> Write for ChecksumWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
