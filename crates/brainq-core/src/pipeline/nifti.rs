//! Minimal NIfTI-1 reader for tissue probability maps.
//!
//! Only what volume extraction needs: geometry, data type, scaling and the
//! first 3-D volume of a single-file (`n+1`) image, optionally gzipped.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use thiserror::Error;

use crate::error::PipelineError;

const HEADER_SIZE: usize = 348;
/// Voxels at or above this (scaled) value count as tissue.
pub const TISSUE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Error, PartialEq)]
pub enum NiftiError {
    #[error("file too short for a NIfTI-1 header ({0} bytes)")]
    TooShort(usize),

    #[error("sizeof_hdr is {0}, expected 348")]
    BadHeaderSize(i32),

    #[error("unsupported magic {0:?}, expected single-file n+1")]
    UnsupportedMagic([u8; 4]),

    #[error("unsupported datatype code {0}")]
    UnsupportedDatatype(i16),

    #[error("invalid dimensions {0:?}")]
    BadDimensions([i16; 4]),

    #[error("voxel data truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Datatype {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Datatype {
    fn from_code(code: i16) -> Result<Self, NiftiError> {
        Ok(match code {
            2 => Datatype::U8,
            4 => Datatype::I16,
            8 => Datatype::I32,
            16 => Datatype::F32,
            64 => Datatype::F64,
            256 => Datatype::I8,
            512 => Datatype::U16,
            768 => Datatype::U32,
            other => return Err(NiftiError::UnsupportedDatatype(other)),
        })
    }

    fn size(self) -> usize {
        match self {
            Datatype::U8 | Datatype::I8 => 1,
            Datatype::I16 | Datatype::U16 => 2,
            Datatype::I32 | Datatype::U32 | Datatype::F32 => 4,
            Datatype::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialUnit {
    Unknown,
    Meter,
    Millimeter,
    Micron,
}

impl SpatialUnit {
    fn from_xyzt(xyzt_units: u8) -> Self {
        match xyzt_units & 0x07 {
            1 => SpatialUnit::Meter,
            2 => SpatialUnit::Millimeter,
            3 => SpatialUnit::Micron,
            _ => SpatialUnit::Unknown,
        }
    }

    /// Cubic millimetres per cubic unit. Unknown units are taken as mm.
    fn mm3_per_unit3(self) -> f64 {
        match self {
            SpatialUnit::Meter => 1e9,
            SpatialUnit::Millimeter | SpatialUnit::Unknown => 1.0,
            SpatialUnit::Micron => 1e-9,
        }
    }
}

/// Parsed NIfTI-1 header fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    little_endian: bool,
    datatype: Datatype,
    pub dims: [usize; 3],
    pub pixdim: [f32; 3],
    pub vox_offset: usize,
    pub scl_slope: f32,
    pub scl_inter: f32,
    pub spatial_unit: SpatialUnit,
}

struct Fields<'a> {
    bytes: &'a [u8],
    little_endian: bool,
}

impl Fields<'_> {
    fn raw<const N: usize>(&self, at: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[at..at + N]);
        out
    }

    fn i16(&self, at: usize) -> i16 {
        let raw = self.raw::<2>(at);
        if self.little_endian {
            i16::from_le_bytes(raw)
        } else {
            i16::from_be_bytes(raw)
        }
    }

    fn f32(&self, at: usize) -> f32 {
        let raw = self.raw::<4>(at);
        if self.little_endian {
            f32::from_le_bytes(raw)
        } else {
            f32::from_be_bytes(raw)
        }
    }
}

impl NiftiHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, NiftiError> {
        if bytes.len() < HEADER_SIZE {
            return Err(NiftiError::TooShort(bytes.len()));
        }
        let raw_size: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let little_endian = match (i32::from_le_bytes(raw_size), i32::from_be_bytes(raw_size)) {
            (348, _) => true,
            (_, 348) => false,
            (other, _) => return Err(NiftiError::BadHeaderSize(other)),
        };
        let fields = Fields {
            bytes,
            little_endian,
        };

        let magic = fields.raw::<4>(344);
        if &magic != b"n+1\0" {
            return Err(NiftiError::UnsupportedMagic(magic));
        }

        let dim = [fields.i16(40), fields.i16(42), fields.i16(44), fields.i16(46)];
        let ndim = dim[0];
        if !(1..=7).contains(&ndim) || dim[1..=ndim.min(3) as usize].iter().any(|&d| d < 1) {
            return Err(NiftiError::BadDimensions(dim));
        }
        // Axes beyond dim[0] are singletons.
        let axis = |i: usize| if (i as i16) <= ndim { dim[i] as usize } else { 1 };

        let vox_offset = fields.f32(108);
        let vox_offset = if vox_offset.is_finite() && vox_offset >= HEADER_SIZE as f32 {
            vox_offset as usize
        } else {
            352
        };

        Ok(Self {
            little_endian,
            datatype: Datatype::from_code(fields.i16(70))?,
            dims: [axis(1), axis(2), axis(3)],
            pixdim: [fields.f32(80), fields.f32(84), fields.f32(88)],
            vox_offset,
            scl_slope: fields.f32(112),
            scl_inter: fields.f32(116),
            spatial_unit: SpatialUnit::from_xyzt(bytes[123]),
        })
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Physical volume of one voxel in mm³.
    pub fn voxel_volume_mm3(&self) -> f64 {
        let [x, y, z] = self.pixdim.map(|d| f64::from(d).abs());
        x * y * z * self.spatial_unit.mm3_per_unit3()
    }

    fn scale(&self, raw: f64) -> f64 {
        let slope = f64::from(self.scl_slope);
        if slope.is_finite() && slope != 0.0 {
            raw * slope + f64::from(self.scl_inter)
        } else {
            raw
        }
    }

    fn read_voxel(&self, chunk: &[u8]) -> f64 {
        macro_rules! num {
            ($t:ty) => {{
                let raw = chunk.try_into().unwrap_or([0u8; std::mem::size_of::<$t>()]);
                if self.little_endian {
                    <$t>::from_le_bytes(raw) as f64
                } else {
                    <$t>::from_be_bytes(raw) as f64
                }
            }};
        }
        match self.datatype {
            Datatype::U8 => f64::from(chunk[0]),
            Datatype::I8 => f64::from(chunk[0] as i8),
            Datatype::I16 => num!(i16),
            Datatype::U16 => num!(u16),
            Datatype::I32 => num!(i32),
            Datatype::U32 => num!(u32),
            Datatype::F32 => num!(f32),
            Datatype::F64 => num!(f64),
        }
    }

    /// Voxels of the first 3-D volume whose scaled value reaches the threshold.
    pub fn count_tissue_voxels(&self, bytes: &[u8]) -> Result<u64, NiftiError> {
        let size = self.datatype.size();
        let needed = self
            .voxel_count()
            .checked_mul(size)
            .and_then(|data| data.checked_add(self.vox_offset))
            .unwrap_or(usize::MAX);
        if bytes.len() < needed {
            return Err(NiftiError::Truncated {
                needed,
                available: bytes.len(),
            });
        }
        let count = bytes[self.vox_offset..needed]
            .chunks_exact(size)
            .filter(|chunk| self.scale(self.read_voxel(chunk)) >= TISSUE_THRESHOLD)
            .count();
        Ok(count as u64)
    }
}

/// Tissue volume (mm³) of an in-memory NIfTI-1 image.
pub fn tissue_volume_mm3(bytes: &[u8]) -> Result<f64, NiftiError> {
    let header = NiftiHeader::parse(bytes)?;
    let voxels = header.count_tissue_voxels(bytes)?;
    Ok(voxels as f64 * header.voxel_volume_mm3())
}

/// Read a `.nii` / `.nii.gz` file and compute its tissue volume. Blocking.
pub fn read_tissue_volume(path: &Path) -> Result<f64, PipelineError> {
    let bytes = read_image(path)?;
    tissue_volume_mm3(&bytes).map_err(|e| PipelineError::InvalidArtifact {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Read an image, transparently gunzipping `.gz`. Blocking.
pub fn read_image(path: &Path) -> Result<Vec<u8>, PipelineError> {
    let context = || format!("failed to read {}", path.display());
    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(context(), e))?;
    let mut bytes = Vec::new();
    let is_gz = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    let read = if is_gz {
        GzDecoder::new(file).read_to_end(&mut bytes)
    } else {
        std::io::BufReader::new(file).read_to_end(&mut bytes)
    };
    read.map_err(|e| PipelineError::io(context(), e))?;
    Ok(bytes)
}

/// Encode a little-endian float32 `n+1` image, mm units.
#[cfg(test)]
pub(crate) fn encode_test_image(dims: [i16; 3], pixdim: [f32; 3], voxels: &[f32]) -> Vec<u8> {
    let mut bytes = vec![0u8; 352];
    bytes[0..4].copy_from_slice(&348i32.to_le_bytes());
    let dim = [3i16, dims[0], dims[1], dims[2], 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        bytes[40 + i * 2..42 + i * 2].copy_from_slice(&d.to_le_bytes());
    }
    bytes[70..72].copy_from_slice(&16i16.to_le_bytes());
    bytes[72..74].copy_from_slice(&32i16.to_le_bytes());
    let pix = [1.0f32, pixdim[0], pixdim[1], pixdim[2]];
    for (i, p) in pix.iter().enumerate() {
        bytes[76 + i * 4..80 + i * 4].copy_from_slice(&p.to_le_bytes());
    }
    bytes[108..112].copy_from_slice(&352f32.to_le_bytes());
    bytes[123] = 2;
    bytes[344..348].copy_from_slice(b"n+1\0");
    for v in voxels {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}
