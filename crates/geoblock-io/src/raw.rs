//! Flat tiled raw file driver (`GBR`).
//!
//! File layout, all integers little-endian:
//!
//! | Offset | Size | Field                         |
//! |--------|------|-------------------------------|
//! | 0      | 4    | magic `GBR1`                  |
//! | 4      | 2    | format version (1)            |
//! | 6      | 2    | data type code                |
//! | 8      | 4    | width                         |
//! | 12     | 4    | height                        |
//! | 16     | 4    | band count                    |
//! | 20     | 4    | block width                   |
//! | 24     | 4    | block height                  |
//! | 28     | 4    | reserved, zero                |
//!
//! The header is followed by every block of band 1 in row-major block order,
//! then band 2, and so on. Edge blocks are stored at full block size. Sample
//! words are little-endian.

use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use geoblock_core::{DataType, Error, Result};
use tracing::debug;

use crate::block_store::{BandLayout, BlockCodec, BlockKey};
use crate::config::CacheConfig;
use crate::dataset::{Access, Dataset};
use crate::driver::{CreateParams, Driver};

/// File signature.
pub const MAGIC: &[u8; 4] = b"GBR1";
/// Current format version.
pub const VERSION: u16 = 1;
/// Header length in bytes.
pub const HEADER_LEN: u64 = 32;

/// Block side used when neither the caller nor the config picks one.
const DEFAULT_BLOCK_SIDE: usize = 256;

/// Parsed file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    /// Sample type of every band.
    pub data_type: DataType,
    /// Raster width.
    pub width: usize,
    /// Raster height.
    pub height: usize,
    /// Number of bands.
    pub bands: usize,
    /// Block width.
    pub block_width: usize,
    /// Block height.
    pub block_height: usize,
}

impl RawHeader {
    fn layout(&self) -> BandLayout {
        BandLayout::new(self.data_type, self.width, self.height, self.block_width, self.block_height)
    }

    /// Bytes of pixel data following the header.
    ///
    /// Fails with [`Error::Format`] when the size is not addressable.
    pub fn data_len(&self) -> Result<u64> {
        self.layout()
            .checked_band_bytes()
            .and_then(|band| band.checked_mul(self.bands))
            .and_then(|len| u64::try_from(len).ok())
            .filter(|len| len.checked_add(HEADER_LEN).is_some())
            .ok_or_else(|| {
                Error::Format(format!(
                    "{}x{} {} raster with {} bands and {}x{} blocks is too large",
                    self.width,
                    self.height,
                    self.data_type,
                    self.bands,
                    self.block_width,
                    self.block_height
                ))
            })
    }

    /// Serializes to the 32-byte on-disk form.
    pub fn to_bytes(&self) -> Result<[u8; HEADER_LEN as usize]> {
        let mut out = [0u8; HEADER_LEN as usize];
        let mut w = Cursor::new(&mut out[..]);
        w.write_all(MAGIC)?;
        w.write_u16::<LittleEndian>(VERSION)?;
        w.write_u16::<LittleEndian>(self.data_type.code())?;
        for v in [self.width, self.height, self.bands, self.block_width, self.block_height] {
            let v = u32::try_from(v)
                .map_err(|_| Error::invalid_argument(format!("{v} does not fit a GBR header")))?;
            w.write_u32::<LittleEndian>(v)?;
        }
        w.write_u32::<LittleEndian>(0)?;
        Ok(out)
    }

    /// Parses and validates a header.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::Format(format!("bad GBR magic {magic:02X?}")));
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version != VERSION {
            return Err(Error::Format(format!("unsupported GBR version {version}")));
        }
        let code = reader.read_u16::<LittleEndian>()?;
        let data_type = DataType::from_code(code)
            .ok_or_else(|| Error::Format(format!("unknown data type code {code}")))?;
        let mut field = || -> Result<usize> { Ok(reader.read_u32::<LittleEndian>()? as usize) };
        let header = Self {
            data_type,
            width: field()?,
            height: field()?,
            bands: field()?,
            block_width: field()?,
            block_height: field()?,
        };
        if header.width == 0 || header.height == 0 || header.bands == 0 {
            return Err(Error::Format(format!(
                "empty raster {}x{} with {} bands",
                header.width, header.height, header.bands
            )));
        }
        if header.block_width == 0 || header.block_height == 0 {
            return Err(Error::Format(format!(
                "invalid block size {}x{}",
                header.block_width, header.block_height
            )));
        }
        header.data_len()?;
        Ok(header)
    }
}

/// Reads and writes blocks of an open GBR file.
#[derive(Debug)]
pub struct RawCodec {
    file: Mutex<File>,
    blocks_per_band: usize,
    read_only: bool,
}

impl RawCodec {
    fn new(file: File, header: &RawHeader, read_only: bool) -> Self {
        Self {
            file: Mutex::new(file),
            blocks_per_band: header.layout().grid().block_count(),
            read_only,
        }
    }

    fn offset(&self, key: BlockKey, layout: &BandLayout) -> u64 {
        let index = key.band * self.blocks_per_band + layout.grid().linear_index(key.x, key.y);
        HEADER_LEN + (index * layout.block_bytes()) as u64
    }
}

/// Converts between little-endian file words and host words.
fn swap_to_host(layout: &BandLayout, buf: &mut [u8]) {
    if cfg!(target_endian = "big") {
        let word = layout.data_type.component().size_bytes();
        if word > 1 {
            buf.chunks_exact_mut(word).for_each(<[u8]>::reverse);
        }
    }
}

impl BlockCodec for RawCodec {
    fn decode(&self, key: BlockKey, layout: &BandLayout, buf: &mut [u8]) -> Result<()> {
        let offset = self.offset(key, layout);
        {
            let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)
                .map_err(|e| Error::decode(format!("reading {key} at {offset}: {e}")))?;
        }
        swap_to_host(layout, buf);
        Ok(())
    }

    fn encode(&self, key: BlockKey, layout: &BandLayout, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let offset = self.offset(key, layout);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        if cfg!(target_endian = "big") {
            let mut le = buf.to_vec();
            swap_to_host(layout, &mut le);
            file.write_all(&le)?;
        } else {
            file.write_all(buf)?;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.sync_data()?;
        Ok(())
    }
}

/// The `GBR` driver.
#[derive(Debug, Default)]
pub struct RawDriver;

impl RawDriver {
    /// Reads the header of `path` without opening a dataset.
    pub fn read_header(path: &Path) -> Result<RawHeader> {
        let mut file = File::open(path)?;
        RawHeader::read_from(&mut file)
    }
}

impl Driver for RawDriver {
    fn short_name(&self) -> &str {
        "GBR"
    }

    fn long_name(&self) -> &str {
        "GeoBlock Raw Tiles"
    }

    fn extensions(&self) -> &[&str] {
        &["gbr"]
    }

    fn identify(&self, path: &Path) -> bool {
        let mut magic = [0u8; 4];
        File::open(path)
            .and_then(|mut f| f.read_exact(&mut magic))
            .is_ok_and(|()| &magic == MAGIC)
    }

    fn open(&self, path: &Path, access: Access, config: &CacheConfig) -> Result<Dataset> {
        let mut file = match access {
            Access::ReadOnly => File::open(path)?,
            Access::Update => OpenOptions::new().read(true).write(true).open(path)?,
        };
        let header = RawHeader::read_from(&mut file)?;
        let expected = HEADER_LEN + header.data_len()?;
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(Error::Format(format!(
                "{} is truncated: {actual} bytes, expected {expected}",
                path.display()
            )));
        }
        debug!(
            path = %path.display(),
            width = header.width,
            height = header.height,
            bands = header.bands,
            data_type = %header.data_type,
            ?access,
            "opened GBR dataset"
        );
        let layouts = vec![header.layout(); header.bands];
        let codec = Arc::new(RawCodec::new(file, &header, access == Access::ReadOnly));
        Dataset::new(path.display().to_string(), "GBR", access, codec, layouts, *config)
    }

    fn create(&self, path: &Path, params: &CreateParams, config: &CacheConfig) -> Result<Dataset> {
        params.validate()?;
        let (block_width, block_height) = params.block_size.or(config.default_block_size).unwrap_or((
            params.width.min(DEFAULT_BLOCK_SIDE),
            params.height.min(DEFAULT_BLOCK_SIDE),
        ));
        let header = RawHeader {
            data_type: params.data_type,
            width: params.width,
            height: params.height,
            bands: params.bands,
            block_width,
            block_height,
        };
        let bytes = header.to_bytes()?;
        let data_len = header.data_len()?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&bytes)?;
        file.set_len(HEADER_LEN + data_len)?;
        debug!(
            path = %path.display(),
            width = params.width,
            height = params.height,
            bands = params.bands,
            block_width,
            block_height,
            "created GBR dataset"
        );

        let layouts = vec![header.layout(); header.bands];
        let codec = Arc::new(RawCodec::new(file, &header, false));
        Dataset::new(path.display().to_string(), "GBR", Access::Update, codec, layouts, *config)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        debug!(path = %path.display(), "deleted GBR dataset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoblock_core::Window;

    fn header() -> RawHeader {
        RawHeader {
            data_type: DataType::Int16,
            width: 300,
            height: 200,
            bands: 2,
            block_width: 128,
            block_height: 64,
        }
    }

    #[test]
    fn header_bytes() {
        let bytes = header().to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"GBR1");
        assert_eq!(&bytes[4..6], &[1, 0]);
        assert_eq!(&bytes[6..8], &[DataType::Int16.code() as u8, 0]);
        assert_eq!(&bytes[8..12], &300u32.to_le_bytes());
        assert_eq!(&bytes[28..], &[0; 4]);
        let parsed = RawHeader::read_from(&mut &bytes[..]).unwrap();
        assert_eq!(parsed, header());
    }

    #[test]
    fn data_len_counts_full_edge_blocks() {
        // 3x4 blocks of 128x64 Int16, two bands.
        assert_eq!(header().data_len().unwrap(), 2 * 12 * 128 * 64 * 2);
    }

    #[test]
    fn rejects_bad_headers() {
        let mut bytes = header().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(RawHeader::read_from(&mut &bytes[..]), Err(Error::Format(_))));

        let mut bytes = header().to_bytes().unwrap();
        bytes[4] = 9;
        assert!(matches!(RawHeader::read_from(&mut &bytes[..]), Err(Error::Format(_))));

        let mut bytes = header().to_bytes().unwrap();
        bytes[6] = 0;
        assert!(matches!(RawHeader::read_from(&mut &bytes[..]), Err(Error::Format(_))));

        let mut bytes = header().to_bytes().unwrap();
        bytes[20..24].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(RawHeader::read_from(&mut &bytes[..]), Err(Error::Format(_))));

        assert!(RawHeader::read_from(&mut &bytes[..10]).is_err());
    }

    #[test]
    fn oversized_header_is_a_format_error() {
        let mut bytes = [0u8; HEADER_LEN as usize];
        let mut w = Cursor::new(&mut bytes[..]);
        w.write_all(MAGIC).unwrap();
        w.write_u16::<LittleEndian>(VERSION).unwrap();
        w.write_u16::<LittleEndian>(DataType::Float64.code()).unwrap();
        for v in [u32::MAX, u32::MAX, u32::MAX, 1, 1, 0] {
            w.write_u32::<LittleEndian>(v).unwrap();
        }
        assert!(matches!(RawHeader::read_from(&mut &bytes[..]), Err(Error::Format(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.gbr");
        std::fs::write(&path, bytes).unwrap();
        let err = RawDriver.open(&path, Access::ReadOnly, &CacheConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn create_write_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.gbr");
        let config = CacheConfig::default();
        {
            let params = CreateParams::new(10, 6, 1, DataType::UInt16).with_block_size(4, 4);
            let ds = RawDriver.create(&path, &params, &config).unwrap();
            let values: Vec<u16> = (0..60).map(|v| v * 1000).collect();
            ds.band(1).unwrap().write_from(&Window::full(10, 6), &values).unwrap();
            ds.close().unwrap();
        }
        assert!(RawDriver.identify(&path));
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            HEADER_LEN + 6 * 16 * 2
        );

        let ds = RawDriver.open(&path, Access::ReadOnly, &config).unwrap();
        assert_eq!((ds.x_size(), ds.y_size()), (10, 6));
        assert_eq!(ds.band(1).unwrap().block_size(), (4, 4));
        let back: Vec<u16> = ds.band(1).unwrap().read_vec(&Window::new(8, 5, 2, 1)).unwrap();
        assert_eq!(back, vec![58000, 59000]);
    }

    #[test]
    fn read_only_codec_refuses_encode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.gbr");
        let params = CreateParams::new(4, 4, 1, DataType::Byte);
        RawDriver.create(&path, &params, &CacheConfig::default()).unwrap().close().unwrap();

        let header = RawDriver::read_header(&path).unwrap();
        let codec = RawCodec::new(File::open(&path).unwrap(), &header, true);
        let layout = header.layout();
        let err = codec.encode(BlockKey::new(0, 0, 0), &layout, &vec![0; layout.block_bytes()]);
        assert!(matches!(err, Err(Error::ReadOnly)));
        codec.sync().unwrap();

        let ds = RawDriver.open(&path, Access::ReadOnly, &CacheConfig::default()).unwrap();
        assert!(matches!(ds.band(1).unwrap().fill(1.0, 0.0), Err(Error::ReadOnly)));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.gbr");
        let bytes = header().to_bytes().unwrap();
        std::fs::write(&path, bytes).unwrap();
        assert!(RawDriver.identify(&path));
        let err = RawDriver.open(&path, Access::ReadOnly, &CacheConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn identify_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.gbr");
        std::fs::write(&path, b"not a raster").unwrap();
        assert!(!RawDriver.identify(&path));
        assert!(!RawDriver.identify(&dir.path().join("missing.gbr")));
        RawDriver.delete(&path).unwrap();
        assert!(!path.exists());
    }
}
