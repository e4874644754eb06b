//! Binary tile format
//!
//! Reads and writes tiles in the little endian layout produced by the C++
//! Detour library (`dtCreateNavMeshData`). Every section length and index is
//! validated before a [`MeshTile`] is handed out, so a corrupt payload never
//! reaches a [`NavMesh`](crate::NavMesh).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::nav_mesh::{MeshTile, OffMeshConnection, Poly, PolyDetail, TileHeader};
use crate::{
    NavMeshParams, PolyFlags, PolyType, Result, Status, DT_EXT_LINK, DT_NAVMESH_MAGIC,
    DT_NAVMESH_VERSION, MAX_VERTS_PER_POLY,
};

/// Null link value
const DT_NULL_LINK: u32 = 0xffff_ffff;

/// Serialized size of a dtLink
const LINK_SIZE: u64 = 12;

/// Serialized size of a dtBVNode
const BV_NODE_SIZE: u64 = 16;

/// Serialized size of the tile header
const MESH_HEADER_SIZE: usize = 100;

/// Serialized size of a dtPoly
const POLY_SIZE: usize = 32;

/// Serialized size of a dtPolyDetail
const DETAIL_MESH_SIZE: usize = 12;

/// Serialized size of a dtOffMeshConnection
const OFF_MESH_CON_SIZE: usize = 36;

/// Serialized size of [`NavMeshParams`]
pub const NAV_MESH_PARAMS_SIZE: usize = 28;

/// Mesh header structure matching C++ dtMeshHeader
#[derive(Debug, Clone)]
struct MeshHeader {
    magic: u32,
    version: u32,
    x: i32,
    y: i32,
    layer: i32,
    user_id: u32,
    poly_count: i32,
    vert_count: i32,
    max_link_count: i32,
    detail_mesh_count: i32,
    detail_vert_count: i32,
    detail_tri_count: i32,
    bv_node_count: i32,
    off_mesh_con_count: i32,
    off_mesh_base: i32,
    walkable_height: f32,
    walkable_radius: f32,
    walkable_climb: f32,
    bmin: [f32; 3],
    bmax: [f32; 3],
    bv_quant_factor: f32,
}

impl MeshHeader {
    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            magic: reader.read_u32::<LittleEndian>()?,
            version: reader.read_u32::<LittleEndian>()?,
            x: reader.read_i32::<LittleEndian>()?,
            y: reader.read_i32::<LittleEndian>()?,
            layer: reader.read_i32::<LittleEndian>()?,
            user_id: reader.read_u32::<LittleEndian>()?,
            poly_count: reader.read_i32::<LittleEndian>()?,
            vert_count: reader.read_i32::<LittleEndian>()?,
            max_link_count: reader.read_i32::<LittleEndian>()?,
            detail_mesh_count: reader.read_i32::<LittleEndian>()?,
            detail_vert_count: reader.read_i32::<LittleEndian>()?,
            detail_tri_count: reader.read_i32::<LittleEndian>()?,
            bv_node_count: reader.read_i32::<LittleEndian>()?,
            off_mesh_con_count: reader.read_i32::<LittleEndian>()?,
            off_mesh_base: reader.read_i32::<LittleEndian>()?,
            walkable_height: reader.read_f32::<LittleEndian>()?,
            walkable_radius: reader.read_f32::<LittleEndian>()?,
            walkable_climb: reader.read_f32::<LittleEndian>()?,
            bmin: read_vec3(reader)?,
            bmax: read_vec3(reader)?,
            bv_quant_factor: reader.read_f32::<LittleEndian>()?,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_i32::<LittleEndian>(self.x)?;
        writer.write_i32::<LittleEndian>(self.y)?;
        writer.write_i32::<LittleEndian>(self.layer)?;
        writer.write_u32::<LittleEndian>(self.user_id)?;
        writer.write_i32::<LittleEndian>(self.poly_count)?;
        writer.write_i32::<LittleEndian>(self.vert_count)?;
        writer.write_i32::<LittleEndian>(self.max_link_count)?;
        writer.write_i32::<LittleEndian>(self.detail_mesh_count)?;
        writer.write_i32::<LittleEndian>(self.detail_vert_count)?;
        writer.write_i32::<LittleEndian>(self.detail_tri_count)?;
        writer.write_i32::<LittleEndian>(self.bv_node_count)?;
        writer.write_i32::<LittleEndian>(self.off_mesh_con_count)?;
        writer.write_i32::<LittleEndian>(self.off_mesh_base)?;
        writer.write_f32::<LittleEndian>(self.walkable_height)?;
        writer.write_f32::<LittleEndian>(self.walkable_radius)?;
        writer.write_f32::<LittleEndian>(self.walkable_climb)?;
        write_vec3(writer, &self.bmin)?;
        write_vec3(writer, &self.bmax)?;
        writer.write_f32::<LittleEndian>(self.bv_quant_factor)?;
        Ok(())
    }
}

/// Polygon structure matching C++ dtPoly
#[derive(Debug, Clone)]
struct PolyData {
    first_link: u32,
    verts: [u16; MAX_VERTS_PER_POLY],
    neis: [u16; MAX_VERTS_PER_POLY],
    flags: u16,
    vert_count: u8,
    area_and_type: u8,
}

impl PolyData {
    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let first_link = reader.read_u32::<LittleEndian>()?;

        let mut verts = [0u16; MAX_VERTS_PER_POLY];
        for v in &mut verts {
            *v = reader.read_u16::<LittleEndian>()?;
        }

        let mut neis = [0u16; MAX_VERTS_PER_POLY];
        for n in &mut neis {
            *n = reader.read_u16::<LittleEndian>()?;
        }

        Ok(Self {
            first_link,
            verts,
            neis,
            flags: reader.read_u16::<LittleEndian>()?,
            vert_count: reader.read_u8()?,
            area_and_type: reader.read_u8()?,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.first_link)?;
        for &v in &self.verts {
            writer.write_u16::<LittleEndian>(v)?;
        }
        for &n in &self.neis {
            writer.write_u16::<LittleEndian>(n)?;
        }
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u8(self.vert_count)?;
        writer.write_u8(self.area_and_type)?;
        Ok(())
    }

    /// Links are rebuilt when the tile is added, the stored chain is dropped
    fn to_poly(&self) -> Poly {
        Poly {
            first_link: None,
            verts: self.verts,
            neighbors: self.neis,
            flags: PolyFlags::from_bits_retain(self.flags),
            vert_count: self.vert_count,
            area: self.area_and_type & 0x3f,
            poly_type: PolyType::from_bits(self.area_and_type >> 6),
        }
    }

    fn from_poly(poly: &Poly) -> Self {
        Self {
            first_link: DT_NULL_LINK,
            verts: poly.verts,
            neis: poly.neighbors,
            flags: poly.flags.bits(),
            vert_count: poly.vert_count,
            area_and_type: (poly.area & 0x3f) | ((poly.poly_type as u8) << 6),
        }
    }
}

fn read_vec3<R: Read>(reader: &mut R) -> Result<[f32; 3]> {
    Ok([
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ])
}

fn write_vec3<W: Write>(writer: &mut W, v: &[f32; 3]) -> Result<()> {
    for &c in v {
        writer.write_f32::<LittleEndian>(c)?;
    }
    Ok(())
}

fn count(value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| Status::DataCorrupted)
}

fn skip(cursor: &mut Cursor<&[u8]>, bytes: u64) -> Result<()> {
    let pos = cursor.position() + bytes;
    if pos > cursor.get_ref().len() as u64 {
        return Err(Status::DataCorrupted);
    }
    cursor.set_position(pos);
    Ok(())
}

/// Decodes a tile payload
///
/// The returned tile has no links and no backing data yet; both are filled
/// in when the tile is added to a mesh.
pub fn load_tile_from_binary(data: &[u8]) -> Result<MeshTile> {
    let mut cursor = Cursor::new(data);

    let header = MeshHeader::read_from(&mut cursor)?;
    if header.magic != DT_NAVMESH_MAGIC {
        return Err(Status::WrongMagic);
    }
    if header.version != DT_NAVMESH_VERSION {
        return Err(Status::WrongVersion);
    }

    let poly_count = count(header.poly_count)?;
    let vert_count = count(header.vert_count)?;
    let max_link_count = count(header.max_link_count)?;
    let detail_mesh_count = count(header.detail_mesh_count)?;
    let detail_vert_count = count(header.detail_vert_count)?;
    let detail_tri_count = count(header.detail_tri_count)?;
    let bv_node_count = count(header.bv_node_count)?;
    let off_mesh_con_count = count(header.off_mesh_con_count)?;
    let off_mesh_base = count(header.off_mesh_base)?;

    // Every section must fit in the payload before anything is allocated.
    let sections = [
        (vert_count, 12),
        (poly_count, POLY_SIZE),
        (max_link_count, LINK_SIZE as usize),
        (detail_mesh_count, DETAIL_MESH_SIZE),
        (detail_vert_count, 12),
        (detail_tri_count, 4),
        (bv_node_count, BV_NODE_SIZE as usize),
        (off_mesh_con_count, OFF_MESH_CON_SIZE),
    ];
    let needed = sections
        .iter()
        .try_fold(MESH_HEADER_SIZE, |total, &(n, size)| {
            n.checked_mul(size).and_then(|bytes| total.checked_add(bytes))
        })
        .ok_or(Status::DataCorrupted)?;
    if needed > data.len() || detail_mesh_count > poly_count || off_mesh_base > poly_count {
        return Err(Status::DataCorrupted);
    }

    let mut verts = Vec::with_capacity(vert_count * 3);
    for _ in 0..vert_count * 3 {
        verts.push(cursor.read_f32::<LittleEndian>()?);
    }

    let mut polys = Vec::with_capacity(poly_count);
    for _ in 0..poly_count {
        let poly = PolyData::read_from(&mut cursor)?.to_poly();
        validate_poly(&poly, vert_count, poly_count)?;
        polys.push(poly);
    }

    skip(&mut cursor, max_link_count as u64 * LINK_SIZE)?;

    let mut detail_meshes = Vec::with_capacity(detail_mesh_count);
    for _ in 0..detail_mesh_count {
        let detail = PolyDetail {
            vert_base: cursor.read_u32::<LittleEndian>()?,
            tri_base: cursor.read_u32::<LittleEndian>()?,
            vert_count: cursor.read_u8()?,
            tri_count: cursor.read_u8()?,
        };
        // Padding of the C++ struct
        cursor.read_u16::<LittleEndian>()?;
        detail_meshes.push(detail);
    }

    let mut detail_verts = Vec::with_capacity(detail_vert_count * 3);
    for _ in 0..detail_vert_count * 3 {
        detail_verts.push(cursor.read_f32::<LittleEndian>()?);
    }

    let mut detail_tris = vec![0u8; detail_tri_count * 4];
    cursor.read_exact(&mut detail_tris)?;

    for (i, detail) in detail_meshes.iter().enumerate() {
        validate_detail(detail, &polys[i], &detail_tris, detail_vert_count)?;
    }

    skip(&mut cursor, bv_node_count as u64 * BV_NODE_SIZE)?;

    let mut off_mesh_connections = Vec::with_capacity(off_mesh_con_count);
    for _ in 0..off_mesh_con_count {
        let mut pos = [0.0f32; 6];
        for p in &mut pos {
            *p = cursor.read_f32::<LittleEndian>()?;
        }
        let con = OffMeshConnection {
            pos,
            radius: cursor.read_f32::<LittleEndian>()?,
            poly: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u8()?,
            side: cursor.read_u8()?,
            user_id: cursor.read_u32::<LittleEndian>()?,
        };
        let poly = polys.get(con.poly as usize).ok_or(Status::DataCorrupted)?;
        if poly.poly_type != PolyType::OffMeshConnection {
            return Err(Status::DataCorrupted);
        }
        off_mesh_connections.push(con);
    }

    Ok(MeshTile {
        salt: 0,
        header: TileHeader {
            x: header.x,
            y: header.y,
            layer: header.layer,
            user_id: header.user_id,
            data_size: data.len(),
            bmin: header.bmin,
            bmax: header.bmax,
            walkable_height: header.walkable_height,
            walkable_radius: header.walkable_radius,
            walkable_climb: header.walkable_climb,
            off_mesh_base,
            bv_quant_factor: header.bv_quant_factor,
        },
        polys,
        verts,
        links: Vec::new(),
        detail_meshes,
        detail_verts,
        detail_tris,
        off_mesh_connections,
        data: Vec::new(),
    })
}

fn validate_poly(poly: &Poly, vert_count: usize, poly_count: usize) -> Result<()> {
    let nv = poly.vert_count as usize;
    let min_verts = match poly.poly_type {
        PolyType::Ground => 3,
        PolyType::OffMeshConnection => 2,
    };
    if nv < min_verts || nv > MAX_VERTS_PER_POLY {
        return Err(Status::DataCorrupted);
    }
    for j in 0..nv {
        if poly.verts[j] as usize >= vert_count {
            return Err(Status::DataCorrupted);
        }
        let nei = poly.neighbors[j];
        if nei != 0 && nei & DT_EXT_LINK == 0 && (nei - 1) as usize >= poly_count {
            return Err(Status::DataCorrupted);
        }
    }
    Ok(())
}

fn validate_detail(
    detail: &PolyDetail,
    poly: &Poly,
    detail_tris: &[u8],
    detail_vert_count: usize,
) -> Result<()> {
    let vert_end = detail.vert_base as usize + detail.vert_count as usize;
    let tri_end = (detail.tri_base as usize + detail.tri_count as usize) * 4;
    if vert_end > detail_vert_count || tri_end > detail_tris.len() {
        return Err(Status::DataCorrupted);
    }
    let limit = poly.vert_count as usize + detail.vert_count as usize;
    let tris = &detail_tris[detail.tri_base as usize * 4..tri_end];
    if tris.chunks_exact(4).any(|t| t[..3].iter().any(|&v| v as usize >= limit)) {
        return Err(Status::DataCorrupted);
    }
    Ok(())
}

/// Encodes a tile into the binary layout
///
/// Links are not serialized; they are rebuilt by the mesh on load.
pub fn save_tile_to_binary(tile: &MeshTile) -> Result<Vec<u8>> {
    let h = &tile.header;
    let to_i32 = |v: usize| i32::try_from(v).map_err(|_| Status::InvalidParam);

    let header = MeshHeader {
        magic: DT_NAVMESH_MAGIC,
        version: DT_NAVMESH_VERSION,
        x: h.x,
        y: h.y,
        layer: h.layer,
        user_id: h.user_id,
        poly_count: to_i32(tile.polys.len())?,
        vert_count: to_i32(tile.verts.len() / 3)?,
        max_link_count: 0,
        detail_mesh_count: to_i32(tile.detail_meshes.len())?,
        detail_vert_count: to_i32(tile.detail_verts.len() / 3)?,
        detail_tri_count: to_i32(tile.detail_tris.len() / 4)?,
        bv_node_count: 0,
        off_mesh_con_count: to_i32(tile.off_mesh_connections.len())?,
        off_mesh_base: to_i32(h.off_mesh_base)?,
        walkable_height: h.walkable_height,
        walkable_radius: h.walkable_radius,
        walkable_climb: h.walkable_climb,
        bmin: h.bmin,
        bmax: h.bmax,
        bv_quant_factor: h.bv_quant_factor,
    };

    let mut buffer = Vec::new();
    header.write_to(&mut buffer)?;

    for &v in &tile.verts {
        buffer.write_f32::<LittleEndian>(v)?;
    }
    for poly in &tile.polys {
        PolyData::from_poly(poly).write_to(&mut buffer)?;
    }
    for detail in &tile.detail_meshes {
        buffer.write_u32::<LittleEndian>(detail.vert_base)?;
        buffer.write_u32::<LittleEndian>(detail.tri_base)?;
        buffer.write_u8(detail.vert_count)?;
        buffer.write_u8(detail.tri_count)?;
        buffer.write_u16::<LittleEndian>(0)?;
    }
    for &v in &tile.detail_verts {
        buffer.write_f32::<LittleEndian>(v)?;
    }
    buffer.write_all(&tile.detail_tris)?;
    for con in &tile.off_mesh_connections {
        for &p in &con.pos {
            buffer.write_f32::<LittleEndian>(p)?;
        }
        buffer.write_f32::<LittleEndian>(con.radius)?;
        buffer.write_u16::<LittleEndian>(con.poly)?;
        buffer.write_u8(con.flags)?;
        buffer.write_u8(con.side)?;
        buffer.write_u32::<LittleEndian>(con.user_id)?;
    }

    Ok(buffer)
}

/// Reads a [`NavMeshParams`] record (matches C++ dtNavMeshParams)
pub fn read_nav_mesh_params<R: Read>(reader: &mut R) -> Result<NavMeshParams> {
    Ok(NavMeshParams {
        origin: read_vec3(reader)?,
        tile_width: reader.read_f32::<LittleEndian>()?,
        tile_height: reader.read_f32::<LittleEndian>()?,
        max_tiles: reader.read_i32::<LittleEndian>()?,
        max_polys_per_tile: reader.read_i32::<LittleEndian>()?,
    })
}

/// Writes a [`NavMeshParams`] record
pub fn write_nav_mesh_params<W: Write>(writer: &mut W, params: &NavMeshParams) -> Result<()> {
    write_vec3(writer, &params.origin)?;
    writer.write_f32::<LittleEndian>(params.tile_width)?;
    writer.write_f32::<LittleEndian>(params.tile_height)?;
    writer.write_i32::<LittleEndian>(params.max_tiles)?;
    writer.write_i32::<LittleEndian>(params.max_polys_per_tile)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::single_quad_tile;

    #[test]
    fn test_tile_round_trip_keeps_geometry() {
        let tile = load_tile_from_binary(&single_quad_tile(0, 0)).unwrap();
        let data = save_tile_to_binary(&tile).unwrap();
        let decoded = load_tile_from_binary(&data).unwrap();

        assert_eq!(decoded.polys.len(), tile.polys.len());
        assert_eq!(decoded.verts, tile.verts);
        assert_eq!(decoded.polys[0].verts, tile.polys[0].verts);
        assert_eq!(decoded.polys[0].neighbors, tile.polys[0].neighbors);
        assert_eq!(decoded.header.bmax, tile.header.bmax);
        assert_eq!(decoded.header.data_size, data.len());
    }

    #[test]
    fn test_rejects_wrong_magic_and_version() {
        let mut data = single_quad_tile(0, 0);
        data[0] ^= 0xff;
        assert_eq!(load_tile_from_binary(&data).unwrap_err(), Status::WrongMagic);

        let mut data = single_quad_tile(0, 0);
        data[4] = 6;
        assert_eq!(load_tile_from_binary(&data).unwrap_err(), Status::WrongVersion);
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let data = single_quad_tile(0, 0);
        let err = load_tile_from_binary(&data[..data.len() - 3]).unwrap_err();
        assert_eq!(err, Status::DataCorrupted);
        assert!(load_tile_from_binary(&data[..40]).is_err());
    }

    #[test]
    fn test_rejects_oversized_section_counts() {
        // detail vertex, detail triangle and off-mesh connection counts
        for offset in [40, 44, 52] {
            let mut data = single_quad_tile(0, 0);
            data[offset..offset + 4].copy_from_slice(&i32::MAX.to_le_bytes());
            assert_eq!(load_tile_from_binary(&data).unwrap_err(), Status::DataCorrupted);
        }
    }

    #[test]
    fn test_rejects_out_of_range_vertex_index() {
        let mut tile = load_tile_from_binary(&single_quad_tile(0, 0)).unwrap();
        tile.polys[0].verts[1] = 200;
        let data = save_tile_to_binary(&tile).unwrap();
        assert_eq!(load_tile_from_binary(&data).unwrap_err(), Status::DataCorrupted);
    }

    #[test]
    fn test_params_record_size() {
        let params = NavMeshParams {
            origin: [-1.0, 2.0, 3.5],
            tile_width: 32.0,
            tile_height: 16.0,
            max_tiles: 128,
            max_polys_per_tile: 512,
        };
        let mut buffer = Vec::new();
        write_nav_mesh_params(&mut buffer, &params).unwrap();
        assert_eq!(buffer.len(), NAV_MESH_PARAMS_SIZE);
        assert_eq!(read_nav_mesh_params(&mut buffer.as_slice()).unwrap(), params);
    }
}
