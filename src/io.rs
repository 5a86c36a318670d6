// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Block I/O against N5 containers on the local filesystem.
//!
//! A dataset is a directory holding `attributes.json` plus one file per grid
//! block at `<dataset>/<gx>/<gy>/<gz>`. Block files start with a big-endian
//! header (`u16` mode, `u16` rank, one `u32` per dimension, and an extra
//! `u32` element count in varlength mode) followed by the big-endian payload,
//! optionally compressed, with `x` varying fastest.
//!
//! Coordinates are `(x, y, z)`; dense blocks are indexed `[z, y, x]`, which
//! keeps the on-disk element order as standard layout.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression as GzipLevel;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use ndarray::{Array3, s};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};
use crate::geometry::{BlockRange, Coord3};

/// Dataset used when none is given.
pub const DEFAULT_DATASET: &str = "/s0";

const ATTRIBUTES_FILE: &str = "attributes.json";
const MODE_DEFAULT: u16 = 0;
const MODE_VARLENGTH: u16 = 1;

/// Element type of an N5 dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

/// Split big-endian bytes into fixed-size words.
fn words<const N: usize>(bytes: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    bytes
        .chunks_exact(N)
        .map(|chunk| std::array::from_fn(|i| chunk[i]))
}

impl DataType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Uint64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Whether every value of this type widens to `f64` without loss.
    #[must_use]
    pub const fn is_float64_safe(self) -> bool {
        !matches!(self, Self::Uint64 | Self::Int64)
    }

    /// Decode a big-endian payload into `f64` samples.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    fn decode(self, bytes: &[u8]) -> Vec<f64> {
        match self {
            Self::Uint8 => bytes.iter().map(|&b| f64::from(b)).collect(),
            Self::Int8 => bytes.iter().map(|&b| f64::from(b as i8)).collect(),
            Self::Uint16 => words(bytes).map(|w| f64::from(u16::from_be_bytes(w))).collect(),
            Self::Int16 => words(bytes).map(|w| f64::from(i16::from_be_bytes(w))).collect(),
            Self::Uint32 => words(bytes).map(|w| f64::from(u32::from_be_bytes(w))).collect(),
            Self::Int32 => words(bytes).map(|w| f64::from(i32::from_be_bytes(w))).collect(),
            Self::Float32 => words(bytes).map(|w| f64::from(f32::from_be_bytes(w))).collect(),
            Self::Uint64 => words(bytes).map(|w| u64::from_be_bytes(w) as f64).collect(),
            Self::Int64 => words(bytes).map(|w| i64::from_be_bytes(w) as f64).collect(),
            Self::Float64 => words(bytes).map(f64::from_be_bytes).collect(),
        }
    }

    /// Encode samples as a big-endian payload, saturating out-of-range values.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn encode(self, values: &[f64]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * self.size());
        for &v in values {
            match self {
                Self::Uint8 => out.push(v as u8),
                Self::Int8 => out.extend((v as i8).to_be_bytes()),
                Self::Uint16 => out.extend((v as u16).to_be_bytes()),
                Self::Int16 => out.extend((v as i16).to_be_bytes()),
                Self::Uint32 => out.extend((v as u32).to_be_bytes()),
                Self::Int32 => out.extend((v as i32).to_be_bytes()),
                Self::Uint64 => out.extend((v as u64).to_be_bytes()),
                Self::Int64 => out.extend((v as i64).to_be_bytes()),
                Self::Float32 => out.extend((v as f32).to_be_bytes()),
                Self::Float64 => out.extend(v.to_be_bytes()),
            }
        }
        out
    }
}

/// Block compression of an N5 dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", from = "CompressionSpec")]
pub enum Compression {
    /// Uncompressed payload.
    Raw,
    /// Deflate with gzip framing, or zlib framing when `useZlib` is set.
    Gzip {
        /// Compression level, `-1` for the library default.
        level: i32,
        /// Use zlib instead of gzip framing.
        #[serde(rename = "useZlib")]
        use_zlib: bool,
    },
    /// Any other codec (`blosc`, `bzip2`, `lz4`, `xz`, ...), kept by name.
    #[serde(skip_serializing)]
    Unsupported(String),
}

/// `compression` object as written in `attributes.json`.
#[derive(Deserialize)]
struct CompressionSpec {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default = "default_gzip_level")]
    level: i32,
    #[serde(default, rename = "useZlib")]
    use_zlib: bool,
}

impl From<CompressionSpec> for Compression {
    fn from(spec: CompressionSpec) -> Self {
        match spec.kind.as_str() {
            "raw" => Self::Raw,
            "gzip" => Self::Gzip {
                level: spec.level,
                use_zlib: spec.use_zlib,
            },
            _ => Self::Unsupported(spec.kind),
        }
    }
}

fn unsupported_compression(name: &str) -> SegmentationError {
    SegmentationError::StoreError(format!("unsupported compression '{name}'"))
}

const fn default_gzip_level() -> i32 {
    -1
}

impl Default for Compression {
    fn default() -> Self {
        Self::Gzip {
            level: default_gzip_level(),
            use_zlib: false,
        }
    }
}

impl Compression {
    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match *self {
            Self::Raw => Ok(payload.to_vec()),
            Self::Unsupported(ref name) => Err(unsupported_compression(name)),
            Self::Gzip { use_zlib, .. } => {
                let mut out = Vec::new();
                if use_zlib {
                    ZlibDecoder::new(payload).read_to_end(&mut out)?;
                } else {
                    GzDecoder::new(payload).read_to_end(&mut out)?;
                }
                Ok(out)
            }
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn compress(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match *self {
            Self::Raw => Ok(payload.to_vec()),
            Self::Unsupported(ref name) => Err(unsupported_compression(name)),
            Self::Gzip { level, use_zlib } => {
                let level = if level < 0 {
                    GzipLevel::default()
                } else {
                    GzipLevel::new(level.min(9) as u32)
                };
                if use_zlib {
                    let mut encoder = ZlibEncoder::new(Vec::new(), level);
                    encoder.write_all(payload)?;
                    Ok(encoder.finish()?)
                } else {
                    let mut encoder = GzEncoder::new(Vec::new(), level);
                    encoder.write_all(payload)?;
                    Ok(encoder.finish()?)
                }
            }
        }
    }
}

/// Contents of a dataset's `attributes.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetAttributes {
    /// Dataset extent along `(x, y, z)`.
    pub dimensions: Vec<u64>,
    /// Block extent along `(x, y, z)`.
    pub block_size: Vec<u32>,
    /// Element type.
    pub data_type: DataType,
    /// Block compression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
    /// Compression name written by older N5 versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_type: Option<String>,
}

impl DatasetAttributes {
    /// Attributes for a new 3D dataset.
    #[must_use]
    pub fn new(
        dimensions: [u64; 3],
        block_size: [u32; 3],
        data_type: DataType,
        compression: Compression,
    ) -> Self {
        Self {
            dimensions: dimensions.to_vec(),
            block_size: block_size.to_vec(),
            data_type,
            compression: Some(compression),
            compression_type: None,
        }
    }

    /// Effective block compression.
    ///
    /// # Errors
    ///
    /// Returns an error for compression schemes other than raw and gzip.
    pub fn compression(&self) -> Result<Compression> {
        match (&self.compression, self.compression_type.as_deref()) {
            (Some(Compression::Unsupported(name)), _) => Err(unsupported_compression(name)),
            (Some(compression), _) => Ok(compression.clone()),
            (None, None | Some("raw")) => Ok(Compression::Raw),
            (None, Some("gzip")) => Ok(Compression::default()),
            (None, Some(other)) => Err(unsupported_compression(other)),
        }
    }

    fn dimensions3(&self) -> Result<[u64; 3]> {
        <[u64; 3]>::try_from(self.dimensions.as_slice()).map_err(|_| {
            SegmentationError::StoreError(format!(
                "expected a 3D dataset, got dimensions {:?}",
                self.dimensions
            ))
        })
    }

    fn block_size3(&self) -> Result<[u64; 3]> {
        let block_size = <[u32; 3]>::try_from(self.block_size.as_slice()).map_err(|_| {
            SegmentationError::StoreError(format!(
                "expected a 3D block size, got {:?}",
                self.block_size
            ))
        })?;
        if block_size.contains(&0) {
            return Err(SegmentationError::StoreError(format!(
                "block size must be positive, got {block_size:?}"
            )));
        }
        Ok(block_size.map(u64::from))
    }
}

/// One decoded grid block, `[z, y, x]`.
struct Chunk {
    data: Array3<f64>,
}

/// Per-axis overlap of a grid block with a requested range, as offsets
/// relative to the range start and to the block origin.
#[derive(Debug, Clone)]
struct Overlap {
    in_range: [std::ops::Range<usize>; 3],
    in_block: [std::ops::Range<usize>; 3],
}

/// Overlap of `[start, end)` with a block at `origin` of extent `size`,
/// all along `(x, y, z)`. Returned ranges are in `[z, y, x]` order.
#[allow(clippy::cast_possible_truncation)]
fn overlap(start: [u64; 3], end: [u64; 3], origin: [u64; 3], size: [u64; 3]) -> Option<Overlap> {
    let mut in_range: [std::ops::Range<usize>; 3] = Default::default();
    let mut in_block: [std::ops::Range<usize>; 3] = Default::default();
    for axis in 0..3 {
        let lo = start[axis].max(origin[axis]);
        let hi = end[axis].min(origin[axis] + size[axis]);
        if lo >= hi {
            return None;
        }
        // x is the last array axis
        let array_axis = 2 - axis;
        in_range[array_axis] = (lo - start[axis]) as usize..(hi - start[axis]) as usize;
        in_block[array_axis] = (lo - origin[axis]) as usize..(hi - origin[axis]) as usize;
    }
    Some(Overlap { in_range, in_block })
}

/// Grid block indices covering `[start, end)` along one axis.
fn grid_span(start: u64, end: u64, block: u64) -> std::ops::RangeInclusive<u64> {
    start / block..=(end - 1) / block
}

/// An N5 container on the local filesystem.
#[derive(Debug, Clone)]
pub struct N5Container {
    root: PathBuf,
}

impl N5Container {
    /// Open an existing container.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(SegmentationError::StoreError(format!(
                "N5 container not found: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Create a container directory (and its root attributes) if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or attributes can't be written.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let attributes = root.join(ATTRIBUTES_FILE);
        if !attributes.exists() {
            fs::write(attributes, serde_json::json!({ "n5": "2.5.1" }).to_string())?;
        }
        Ok(Self { root })
    }

    /// Container root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_path(&self, dataset: &str) -> PathBuf {
        self.root.join(dataset.trim_start_matches('/'))
    }

    /// Read a dataset's attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset doesn't exist or its attributes are
    /// malformed.
    pub fn dataset_attributes(&self, dataset: &str) -> Result<DatasetAttributes> {
        let path = self.dataset_path(dataset).join(ATTRIBUTES_FILE);
        if !path.is_file() {
            return Err(SegmentationError::StoreError(format!(
                "dataset '{dataset}' not found in {}",
                self.root.display()
            )));
        }
        let attributes: DatasetAttributes = serde_json::from_str(&fs::read_to_string(&path)?)?;
        attributes.dimensions3()?;
        attributes.block_size3()?;
        attributes.compression()?;
        Ok(attributes)
    }

    /// Create (or overwrite the attributes of) a dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if the attributes can't be written.
    pub fn create_dataset(&self, dataset: &str, attributes: &DatasetAttributes) -> Result<()> {
        let path = self.dataset_path(dataset);
        fs::create_dir_all(&path)?;
        fs::write(
            path.join(ATTRIBUTES_FILE),
            serde_json::to_string(attributes)?,
        )?;
        Ok(())
    }

    /// Check that `range` lies inside the dataset, returning its dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::StoreError`] if the range extends past
    /// the dataset or the dataset isn't 3D.
    pub fn check_range(attributes: &DatasetAttributes, range: &BlockRange) -> Result<[u64; 3]> {
        let dimensions = attributes.dimensions3()?;
        if range.end.0.iter().zip(dimensions.iter()).any(|(e, d)| e > d) {
            return Err(SegmentationError::StoreError(format!(
                "range {range} exceeds dataset dimensions {dimensions:?}"
            )));
        }
        Ok(dimensions)
    }

    fn chunk_path(dataset_path: &Path, grid: [u64; 3]) -> PathBuf {
        dataset_path
            .join(grid[0].to_string())
            .join(grid[1].to_string())
            .join(grid[2].to_string())
    }

    /// Read and decode one grid block; `None` if it was never written.
    fn read_chunk(
        dataset_path: &Path,
        attributes: &DatasetAttributes,
        grid: [u64; 3],
    ) -> Result<Option<Chunk>> {
        let path = Self::chunk_path(dataset_path, grid);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        decode_chunk(&bytes, attributes)
            .map(Some)
            .map_err(|e| SegmentationError::StoreError(format!("{}: {e}", path.display())))
    }

    fn write_chunk(
        dataset_path: &Path,
        attributes: &DatasetAttributes,
        grid: [u64; 3],
        chunk: &Chunk,
    ) -> Result<()> {
        let path = Self::chunk_path(dataset_path, grid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, encode_chunk(chunk, attributes)?)?;
        Ok(())
    }

    /// Read the dense block covering `range`, indexed `[z, y, x]`.
    ///
    /// Grid blocks that were never written read as zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset is missing, the range exceeds it,
    /// its data type can't be widened to `f64` safely, or a block is corrupt.
    pub fn read_block(&self, dataset: &str, range: &BlockRange) -> Result<Array3<f64>> {
        let attributes = self.dataset_attributes(dataset)?;
        Self::check_range(&attributes, range)?;
        if !attributes.data_type.is_float64_safe() {
            return Err(SegmentationError::StoreError(format!(
                "{:?} data can't be safely converted to float64",
                attributes.data_type
            )));
        }

        let mut out = Array3::<f64>::zeros(range.shape());
        if range.is_empty() {
            return Ok(out);
        }

        let dataset_path = self.dataset_path(dataset);
        let block_size = attributes.block_size3()?;
        let (start, end) = (range.start.0, range.end.0);

        for gx in grid_span(start[0], end[0], block_size[0]) {
            for gy in grid_span(start[1], end[1], block_size[1]) {
                for gz in grid_span(start[2], end[2], block_size[2]) {
                    let grid = [gx, gy, gz];
                    let Some(chunk) = Self::read_chunk(&dataset_path, &attributes, grid)? else {
                        continue;
                    };
                    let origin = std::array::from_fn(|i| grid[i] * block_size[i]);
                    let (cz, cy, cx) = chunk.data.dim();
                    let size = [cx as u64, cy as u64, cz as u64];
                    let Some(o) = overlap(start, end, origin, size) else {
                        continue;
                    };
                    let [rz, ry, rx] = o.in_range;
                    let [bz, by, bx] = o.in_block;
                    out.slice_mut(s![rz, ry, rx])
                        .assign(&chunk.data.slice(s![bz, by, bx]));
                }
            }
        }

        Ok(out)
    }

    /// Write a dense `[z, y, x]` block into an existing dataset at `range`.
    ///
    /// Partially covered grid blocks are read, updated and rewritten. Values
    /// are converted to the dataset's data type.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset is missing, the range exceeds it, the
    /// array shape doesn't match the range, or a block can't be written.
    pub fn write_block(&self, dataset: &str, range: &BlockRange, data: &Array3<u8>) -> Result<()> {
        let attributes = self.dataset_attributes(dataset)?;
        let dimensions = Self::check_range(&attributes, range)?;
        let (d0, d1, d2) = data.dim();
        if [d0, d1, d2] != range.shape() {
            return Err(SegmentationError::ShapeMismatch(format!(
                "array {:?} does not match range {range} (expected {:?})",
                [d0, d1, d2],
                range.shape()
            )));
        }
        if range.is_empty() {
            return Ok(());
        }

        let dataset_path = self.dataset_path(dataset);
        let block_size = attributes.block_size3()?;
        let (start, end) = (range.start.0, range.end.0);

        for gx in grid_span(start[0], end[0], block_size[0]) {
            for gy in grid_span(start[1], end[1], block_size[1]) {
                for gz in grid_span(start[2], end[2], block_size[2]) {
                    let grid = [gx, gy, gz];
                    let origin: [u64; 3] = std::array::from_fn(|i| grid[i] * block_size[i]);
                    let size: [u64; 3] =
                        std::array::from_fn(|i| block_size[i].min(dimensions[i] - origin[i]));
                    #[allow(clippy::cast_possible_truncation)]
                    let shape = [size[2] as usize, size[1] as usize, size[0] as usize];

                    let mut chunk = Chunk {
                        data: Array3::zeros(shape),
                    };
                    let covers_block = (0..3)
                        .all(|i| start[i] <= origin[i] && origin[i] + size[i] <= end[i]);
                    if !covers_block {
                        if let Some(existing) =
                            Self::read_chunk(&dataset_path, &attributes, grid)?
                        {
                            let (ez, ey, ex) = existing.data.dim();
                            let common = [ez.min(shape[0]), ey.min(shape[1]), ex.min(shape[2])];
                            chunk
                                .data
                                .slice_mut(s![..common[0], ..common[1], ..common[2]])
                                .assign(&existing.data.slice(s![
                                    ..common[0],
                                    ..common[1],
                                    ..common[2]
                                ]));
                        }
                    }

                    let Some(o) = overlap(start, end, origin, size) else {
                        continue;
                    };
                    let [rz, ry, rx] = o.in_range;
                    let [bz, by, bx] = o.in_block;
                    chunk
                        .data
                        .slice_mut(s![bz, by, bx])
                        .zip_mut_with(&data.slice(s![rz, ry, rx]), |dst, &src| {
                            *dst = f64::from(src);
                        });

                    Self::write_chunk(&dataset_path, &attributes, grid, &chunk)?;
                }
            }
        }

        Ok(())
    }
}

fn take<const N: usize>(bytes: &[u8], offset: &mut usize) -> Result<[u8; N]> {
    let word = bytes
        .get(*offset..*offset + N)
        .ok_or_else(|| SegmentationError::StoreError("truncated block header".to_string()))?;
    *offset += N;
    Ok(std::array::from_fn(|i| word[i]))
}

fn decode_chunk(bytes: &[u8], attributes: &DatasetAttributes) -> Result<Chunk> {
    let mut offset = 0;
    let mode = u16::from_be_bytes(take(bytes, &mut offset)?);
    if mode != MODE_DEFAULT && mode != MODE_VARLENGTH {
        return Err(SegmentationError::StoreError(format!(
            "unsupported block mode {mode}"
        )));
    }
    let ndim = u16::from_be_bytes(take(bytes, &mut offset)?);
    if ndim != 3 {
        return Err(SegmentationError::StoreError(format!(
            "expected a 3D block, got rank {ndim}"
        )));
    }
    let mut size = [0_usize; 3];
    for dim in &mut size {
        *dim = u32::from_be_bytes(take(bytes, &mut offset)?) as usize;
    }
    if mode == MODE_VARLENGTH {
        take::<4>(bytes, &mut offset)?;
    }

    let payload = attributes.compression()?.decompress(&bytes[offset..])?;
    let count: usize = size.iter().product();
    let expected = count * attributes.data_type.size();
    if payload.len() < expected {
        return Err(SegmentationError::StoreError(format!(
            "block payload has {} bytes, expected {expected}",
            payload.len()
        )));
    }

    let values = attributes.data_type.decode(&payload[..expected]);
    let data = Array3::from_shape_vec((size[2], size[1], size[0]), values)?;
    Ok(Chunk { data })
}

#[allow(clippy::cast_possible_truncation)]
fn encode_chunk(chunk: &Chunk, attributes: &DatasetAttributes) -> Result<Vec<u8>> {
    let (z, y, x) = chunk.data.dim();
    let mut bytes = Vec::with_capacity(16);
    bytes.extend(MODE_DEFAULT.to_be_bytes());
    bytes.extend(3_u16.to_be_bytes());
    for dim in [x, y, z] {
        bytes.extend((dim as u32).to_be_bytes());
    }

    let values: Vec<f64> = chunk.data.iter().copied().collect();
    let payload = attributes.data_type.encode(&values);
    bytes.extend(attributes.compression()?.compress(&payload)?);
    Ok(bytes)
}

/// Read the block `[start, end)` from `dataset` in the container at `path`.
///
/// # Errors
///
/// Returns an error if the container, dataset or range is invalid, or a
/// block can't be read.
pub fn read_block<P: AsRef<Path>>(
    path: P,
    dataset: &str,
    start: Coord3,
    end: Coord3,
) -> Result<Array3<f64>> {
    let range = BlockRange::new(start, end)?;
    N5Container::open(path)?.read_block(dataset, &range)
}

/// Write `data` to `[start, end)` of an existing `dataset` in the container
/// at `path`.
///
/// # Errors
///
/// Returns an error if the container, dataset or range is invalid, the
/// array shape doesn't match, or a block can't be written.
pub fn write_block<P: AsRef<Path>>(
    path: P,
    dataset: &str,
    start: Coord3,
    end: Coord3,
    data: &Array3<u8>,
) -> Result<()> {
    let range = BlockRange::new(start, end)?;
    N5Container::open(path)?.write_block(dataset, &range, data)
}
