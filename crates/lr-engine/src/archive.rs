//! Binary tensor archives.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic "LRAR" | version u32 | entry count u64
//! per entry:
//!   name length u64 | name (UTF-8)
//!   kind id u32 | device i64 | rank u32 | dims u64 * rank
//!   requires_grad u8 | payload length u64 | payload
//! ```
//!
//! Payloads hold the elements in row-major order, each encoded
//! little-endian.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::error::{EngineError, Result};
use crate::kind::{Device, Kind};
use crate::shape::Shape;
use crate::storage::CpuStorage;
use crate::tensor::Tensor;

/// Four-byte magic identifying an archive: ASCII "LRAR".
pub const ARCHIVE_MAGIC: [u8; 4] = *b"LRAR";

/// Current archive format version.
pub const ARCHIVE_VERSION: u32 = 1;

/// Name used by [`Tensor::save`] for its single entry.
const SINGLE_TENSOR_ENTRY: &str = "tensor";

/// Collects named tensors and writes them as one archive.
#[derive(Debug, Default)]
pub struct OutputArchive {
    entries: Vec<(String, Tensor)>,
}

impl OutputArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an entry. The tensor is snapshotted, later writes
    /// to it are not reflected in the archive.
    pub fn write(&mut self, name: &str, tensor: &Tensor) -> Result<()> {
        let snapshot = tensor.deep_clone()?;
        if tensor.requires_grad() {
            snapshot.set_requires_grad(true)?;
        }
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = snapshot,
            None => self.entries.push((name.to_string(), snapshot)),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes every entry to `path`, replacing any existing file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&ARCHIVE_MAGIC)?;
        writer.write_all(&ARCHIVE_VERSION.to_le_bytes())?;
        writer.write_all(&(self.entries.len() as u64).to_le_bytes())?;
        for (name, tensor) in &self.entries {
            write_entry(&mut writer, name, tensor)?;
        }
        writer.flush()?;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "archive written");
        Ok(())
    }
}

fn write_entry(writer: &mut impl Write, name: &str, tensor: &Tensor) -> Result<()> {
    let kind = tensor.kind().ok_or(EngineError::UndefinedTensor)?;
    let device = tensor.device().unwrap_or_default();
    let shape = tensor.shape();
    let bytes = tensor.snapshot()?.storage.to_le_bytes();

    writer.write_all(&(name.len() as u64).to_le_bytes())?;
    writer.write_all(name.as_bytes())?;
    writer.write_all(&kind.id().to_le_bytes())?;
    writer.write_all(&device.to_archive().to_le_bytes())?;
    writer.write_all(&(shape.ndim() as u32).to_le_bytes())?;
    for &d in shape.dims() {
        writer.write_all(&(d as u64).to_le_bytes())?;
    }
    writer.write_all(&[tensor.requires_grad() as u8])?;
    writer.write_all(&(bytes.len() as u64).to_le_bytes())?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// A parsed archive, entries keyed by name.
#[derive(Debug, Default)]
pub struct InputArchive {
    entries: HashMap<String, Tensor>,
}

impl InputArchive {
    /// Memory-maps and parses the archive at `path`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<InputArchive> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if file.metadata()?.len() < 16 {
            return Err(EngineError::Other(format!(
                "{} is too small to be an archive",
                path.display()
            )));
        }
        // SAFETY: the mapping is read-only and dropped before returning.
        let mmap = unsafe { Mmap::map(&file)? };
        let archive = Self::parse(&mmap)?;
        tracing::debug!(path = %path.display(), entries = archive.entries.len(), "archive loaded");
        Ok(archive)
    }

    /// Parses an archive from an in-memory buffer.
    pub fn parse(mut bytes: &[u8]) -> Result<InputArchive> {
        let reader = &mut bytes;
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != ARCHIVE_MAGIC {
            return Err(EngineError::InvalidMagic(magic));
        }
        let version = read_u32(reader)?;
        if version != ARCHIVE_VERSION {
            return Err(EngineError::UnsupportedVersion(version));
        }
        let count = read_u64(reader)?;

        let mut entries = HashMap::new();
        for _ in 0..count {
            let (name, tensor) = read_entry(reader)?;
            entries.insert(name, tensor);
        }
        Ok(InputArchive { entries })
    }

    /// Returns the entry named `name`.
    pub fn read(&self, name: &str) -> Result<Tensor> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::MissingEntry(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_len(reader: &mut &[u8]) -> Result<usize> {
    let len = read_u64(reader)?;
    usize::try_from(len)
        .ok()
        .filter(|&n| n <= reader.len())
        .ok_or_else(|| EngineError::Other(format!("truncated archive: length {} overruns data", len)))
}

fn read_entry(reader: &mut &[u8]) -> Result<(String, Tensor)> {
    let name_len = read_len(reader)?;
    let mut name = vec![0u8; name_len];
    reader.read_exact(&mut name)?;
    let name = String::from_utf8(name)
        .map_err(|e| EngineError::Other(format!("invalid entry name: {}", e)))?;

    let kind_id = read_u32(reader)?;
    let kind = Kind::from_id(kind_id).ok_or(EngineError::UnknownKindId(kind_id))?;
    let mut buf8 = [0u8; 8];
    reader.read_exact(&mut buf8)?;
    let device = Device::from_archive(i64::from_le_bytes(buf8));

    let rank = read_u32(reader)?;
    let dims = (0..rank)
        .map(|_| read_u64(reader).map(|d| d as usize))
        .collect::<Result<Vec<_>>>()?;
    let shape = Shape::new(dims);

    let mut flag = [0u8; 1];
    reader.read_exact(&mut flag)?;
    let requires_grad = flag[0] != 0;

    let payload_len = read_len(reader)?;
    let data: &[u8] = *reader;
    let (payload, rest) = data.split_at(payload_len);
    *reader = rest;
    let storage = CpuStorage::from_le_bytes(kind, payload)?;
    let tensor = Tensor::from_storage(storage, shape, device)?;
    if requires_grad {
        tensor.set_requires_grad(true)?;
    }
    Ok((name, tensor))
}

impl Tensor {
    /// Writes this tensor as a single-entry archive.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut archive = OutputArchive::new();
        archive.write(SINGLE_TENSOR_ENTRY, self)?;
        archive.save_to(path)
    }

    /// Reads a tensor written by [`Tensor::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Tensor> {
        InputArchive::load_from(path)?.read(SINGLE_TENSOR_ENTRY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Options;

    #[test]
    fn test_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.lrar");

        let a = Tensor::from_slice(&[1.0, -2.5, 3.0, 4.0], &[2, 2], Options::default())
            .unwrap()
            .set_requires_grad(true)
            .unwrap();
        let b = Tensor::from_slice(
            &[i64::MAX as f64, 5.0],
            &[2],
            Options::new(Kind::Int64, Device::Cuda(1)),
        )
        .unwrap();
        let mut out = OutputArchive::new();
        out.write("a", &a).unwrap();
        out.write("b", &b).unwrap();
        out.save_to(&path).unwrap();

        let input = InputArchive::load_from(&path).unwrap();
        let a2 = input.read("a").unwrap();
        assert_eq!(a2.sizes(), vec![2, 2]);
        assert_eq!(a2.to_f64_vec().unwrap(), a.to_f64_vec().unwrap());
        assert!(a2.requires_grad());

        let b2 = input.read("b").unwrap();
        assert_eq!(b2.kind(), Some(Kind::Int64));
        assert_eq!(b2.device(), Some(Device::Cuda(1)));
        assert_eq!(b2.to_bytes().unwrap(), b.to_bytes().unwrap());

        assert!(matches!(input.read("c"), Err(EngineError::MissingEntry(_))));
    }

    #[test]
    fn test_write_snapshots() {
        let t = Tensor::zeros(&[1], Options::default()).unwrap();
        let mut out = OutputArchive::new();
        out.write("t", &t).unwrap();
        t.copy_(&Tensor::ones(&[1], Options::default()).unwrap()).unwrap();
        out.write("t", &t).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_bad_magic() {
        let bytes = b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        assert!(matches!(
            InputArchive::parse(bytes),
            Err(EngineError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_truncated() {
        let mut bytes = ARCHIVE_MAGIC.to_vec();
        bytes.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&1000u64.to_le_bytes());
        assert!(InputArchive::parse(&bytes).is_err());
    }

    #[test]
    fn test_single_tensor_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.lrar");
        let t = Tensor::eye(3, Options::new(Kind::BFloat16, Device::Cpu)).unwrap();
        t.save(&path).unwrap();
        let loaded = Tensor::load(&path).unwrap();
        assert_eq!(loaded.kind(), Some(Kind::BFloat16));
        assert_eq!(loaded.to_f64_vec().unwrap(), t.to_f64_vec().unwrap());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Tensor::load("/nonexistent/dir/t.lrar"),
            Err(EngineError::Io(_))
        ));
    }
}
