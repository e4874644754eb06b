//! `.mmap` / `.mmtile` file layout
//!
//! Every file starts with a 20 byte little endian [`MmapTileHeader`]. The
//! per-map parameter file follows it with a `NavMeshParams` record, tile and
//! model files with `size` bytes of detour tile payload.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use detour::{read_nav_mesh_params, write_nav_mesh_params, NavMeshParams, NAV_MESH_PARAMS_SIZE};

use crate::coords::TileCoord;
use crate::error::{FormatError, TileError};

/// Magic number of every navigation file ('MMAP')
pub const MMAP_MAGIC: u32 = 0x4d4d_4150;

/// Version of the file layout
pub const MMAP_VERSION: u32 = 3;

/// Detour payload version the files are written for
pub const DT_VERSION: u32 = detour::DT_NAVMESH_VERSION;

/// Serialized size of [`MmapTileHeader`]
pub const MMAP_HEADER_SIZE: usize = 20;

bitflags! {
    /// Terrain kinds stored in polygon flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct NavTerrain: u16 {
        const GROUND = 0x01;
        const MAGMA = 0x02;
        const SLIME = 0x04;
        const WATER = 0x08;
        const STEEP_SLOPES = 0x10;
    }
}

/// Header of every navigation file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapTileHeader {
    pub magic: u32,
    pub dt_version: u32,
    pub mmap_version: u32,
    /// Bytes following the header
    pub size: u32,
    pub uses_liquids: bool,
}

impl MmapTileHeader {
    pub fn new(size: u32, uses_liquids: bool) -> Self {
        Self {
            magic: MMAP_MAGIC,
            dt_version: DT_VERSION,
            mmap_version: MMAP_VERSION,
            size,
            uses_liquids,
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        let dt_version = reader.read_u32::<LittleEndian>()?;
        let mmap_version = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u32::<LittleEndian>()?;
        let uses_liquids = reader.read_u8()? != 0;
        // Padding after the flag
        let mut pad = [0u8; 3];
        reader.read_exact(&mut pad)?;
        Ok(Self {
            magic,
            dt_version,
            mmap_version,
            size,
            uses_liquids,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.dt_version)?;
        writer.write_u32::<LittleEndian>(self.mmap_version)?;
        writer.write_u32::<LittleEndian>(self.size)?;
        writer.write_u8(u8::from(self.uses_liquids))?;
        writer.write_all(&[0u8; 3])?;
        Ok(())
    }

    /// Checks magic and both versions
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.magic != MMAP_MAGIC {
            return Err(FormatError::BadMagic { found: self.magic });
        }
        if self.dt_version != DT_VERSION {
            return Err(FormatError::BadDetourVersion {
                found: self.dt_version,
                expected: DT_VERSION,
            });
        }
        if self.mmap_version != MMAP_VERSION {
            return Err(FormatError::BadMmapVersion {
                found: self.mmap_version,
                expected: MMAP_VERSION,
            });
        }
        Ok(())
    }
}

/// `{map:03}.mmap`
pub fn params_file_name(map_id: u32) -> String {
    format!("{:03}.mmap", map_id)
}

/// `{map:03}{y:02}{x:02}.mmtile`
pub fn tile_file_name(map_id: u32, coord: TileCoord) -> String {
    format!("{:03}{:02}{:02}.mmtile", map_id, coord.y, coord.x)
}

/// `{display:04}.mmap`
pub fn model_file_name(display_id: u32) -> String {
    format!("{:04}.mmap", display_id)
}

/// Reads a file and splits it into its validated header and payload
fn read_checked(path: &Path) -> Result<(MmapTileHeader, Vec<u8>), TileError> {
    let data = std::fs::read(path).map_err(|e| TileError::io(path, e))?;
    if data.len() < MMAP_HEADER_SIZE {
        return Err(TileError::format(path, FormatError::Truncated));
    }

    let mut cursor = Cursor::new(data.as_slice());
    let header = MmapTileHeader::read_from(&mut cursor)
        .map_err(|_| TileError::format(path, FormatError::Truncated))?;
    header
        .validate()
        .map_err(|reason| TileError::format(path, reason))?;

    let size = header.size as usize;
    let end = MMAP_HEADER_SIZE + size;
    if data.len() < end {
        return Err(TileError::format(path, FormatError::Truncated));
    }
    Ok((header, data[MMAP_HEADER_SIZE..end].to_vec()))
}

/// Reads the navigation mesh parameters of a map
pub fn read_params_file(path: &Path) -> Result<NavMeshParams, TileError> {
    let (header, payload) = read_checked(path)?;
    if header.size as usize != NAV_MESH_PARAMS_SIZE {
        return Err(TileError::format(
            path,
            FormatError::BadSize {
                found: header.size,
                expected: NAV_MESH_PARAMS_SIZE as u32,
            },
        ));
    }
    read_nav_mesh_params(&mut payload.as_slice())
        .map_err(|_| TileError::format(path, FormatError::Truncated))
}

/// Reads a tile or model file
///
/// Only the file header is checked here; the payload is validated by the
/// mesh before it is linked in.
pub fn read_tile_file(path: &Path) -> Result<(MmapTileHeader, Vec<u8>), TileError> {
    read_checked(path)
}

/// Writes a parameter file
pub fn write_params_file(path: &Path, params: &NavMeshParams) -> Result<(), TileError> {
    let mut buffer = Vec::with_capacity(MMAP_HEADER_SIZE + NAV_MESH_PARAMS_SIZE);
    MmapTileHeader::new(NAV_MESH_PARAMS_SIZE as u32, false)
        .write_to(&mut buffer)
        .map_err(|e| TileError::io(path, e))?;
    write_nav_mesh_params(&mut buffer, params)
        .map_err(|_| TileError::io(path, std::io::Error::other("params record")))?;
    std::fs::write(path, buffer).map_err(|e| TileError::io(path, e))
}

/// Writes a tile or model file around a detour payload
pub fn write_tile_file(path: &Path, payload: &[u8], uses_liquids: bool) -> Result<(), TileError> {
    let size = u32::try_from(payload.len()).map_err(|_| {
        TileError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload too large"),
        )
    })?;
    let mut buffer = Vec::with_capacity(MMAP_HEADER_SIZE + payload.len());
    MmapTileHeader::new(size, uses_liquids)
        .write_to(&mut buffer)
        .map_err(|e| TileError::io(path, e))?;
    buffer.extend_from_slice(payload);
    std::fs::write(path, buffer).map_err(|e| TileError::io(path, e))
}
