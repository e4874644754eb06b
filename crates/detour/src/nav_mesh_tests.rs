//! Tests for tile management and linking in the navigation mesh

#[cfg(test)]
mod tests {
    use crate::nav_mesh_builder::{GridTile, TileBuilder};
    use crate::test_mesh_helpers::*;
    use crate::{NavMesh, NavMeshParams, PolyFlags, PolyRef, PolyType, Status};
    use approx::assert_relative_eq;

    fn poly_ref(mesh: &NavMesh, x: i32, y: i32, index: u32) -> PolyRef {
        let base = mesh.tile_ref_at(x, y, 0).expect("tile present");
        PolyRef::new(base.id() | index)
    }

    #[test]
    fn test_rejects_invalid_params() {
        let mut params = grid_params(4);
        params.tile_width = 0.0;
        assert_eq!(NavMesh::new(params).unwrap_err(), Status::InvalidParam);

        let mut params = grid_params(4);
        params.origin[1] = f32::NAN;
        assert_eq!(NavMesh::new(params).unwrap_err(), Status::InvalidParam);

        // 12 tile bits and 12 polygon bits leave too little salt.
        let params = NavMeshParams {
            max_tiles: 1 << 12,
            max_polys_per_tile: 1 << 12,
            ..grid_params(1)
        };
        assert_eq!(NavMesh::new(params).unwrap_err(), Status::InvalidParam);
    }

    #[test]
    fn test_poly_ref_encoding_round_trip() {
        let mesh = NavMesh::new(grid_params(64)).unwrap();
        let r = mesh.encode_poly_ref(5, 17, 33);
        assert_eq!(mesh.decode_poly_ref(r), (5, 17, 33));
    }

    #[test]
    fn test_add_tile_twice_fails() {
        let params = grid_params(4);
        let mut mesh = NavMesh::new(params).unwrap();
        let data = GridTile::new(&params, 0, 0, 4, 0.0).build().unwrap();
        mesh.add_tile(data.clone()).unwrap();
        assert_eq!(mesh.add_tile(data).unwrap_err(), Status::AlreadyExists);
        assert_eq!(mesh.tile_count(), 1);
    }

    #[test]
    fn test_add_tile_out_of_slots() {
        let params = grid_params(1);
        let mut mesh = NavMesh::new(params).unwrap();
        mesh.add_tile(single_quad_tile(0, 0)).unwrap();
        assert_eq!(
            mesh.add_tile(single_quad_tile(1, 0)).unwrap_err(),
            Status::OutOfMemory
        );
    }

    #[test]
    fn test_tiles_link_across_border() {
        let mesh = create_grid_mesh(2, 1);
        // Cell (3, 0) of tile (0, 0) touches cell (0, 0) of tile (1, 0).
        let west = poly_ref(&mesh, 0, 0, 3);
        let east = poly_ref(&mesh, 1, 0, 0);

        let neighbours = mesh.poly_neighbours(west, 8);
        assert_eq!(neighbours.len(), 3);
        assert!(neighbours.contains(&east));
        assert!(mesh.poly_neighbours(east, 8).contains(&west));

        let (tile, poly) = mesh.get_tile_and_poly_by_ref(west).unwrap();
        let link = tile.links(poly).find(|l| l.reference == east).unwrap();
        assert_eq!(link.side, 0);
        assert_eq!((link.bmin, link.bmax), (0, 255));
    }

    #[test]
    fn test_remove_tile_invalidates_refs_and_links() {
        let mut mesh = create_grid_mesh(2, 1);
        let west = poly_ref(&mesh, 0, 0, 3);
        let east = poly_ref(&mesh, 1, 0, 0);
        let tile_ref = mesh.tile_ref_at(1, 0, 0).unwrap();

        mesh.remove_tile(tile_ref).unwrap();
        assert!(!mesh.is_valid_poly_ref(east));
        assert!(mesh.tile_at(1, 0, 0).is_none());
        assert_eq!(mesh.poly_neighbours(west, 8).len(), 2);
        assert_eq!(mesh.remove_tile(tile_ref).unwrap_err(), Status::InvalidParam);

        // The slot comes back with a new salt.
        let params = *mesh.params();
        let data = GridTile::new(&params, 1, 0, 4, 0.0).build().unwrap();
        let new_ref = mesh.add_tile(data).unwrap();
        assert_ne!(new_ref, tile_ref);
        assert!(!mesh.is_valid_poly_ref(east));
        assert!(mesh
            .poly_neighbours(west, 8)
            .contains(&PolyRef::new(new_ref.id())));
    }

    #[test]
    fn test_poly_height_and_closest_point() {
        let mesh = create_grid_mesh(1, 1);
        let r = poly_ref(&mesh, 0, 0, 0);

        assert_relative_eq!(mesh.get_poly_height(r, &[1.0, 5.0, 1.0]).unwrap(), 0.0);
        assert!(mesh.get_poly_height(r, &[5.0, 0.0, 5.0]).is_none());

        let (closest, over) = mesh.closest_point_on_poly(r, &[-1.0, 0.0, 1.0]).unwrap();
        assert!(!over);
        assert_relative_eq!(closest[0], 0.0);
        assert_relative_eq!(closest[2], 1.0);
    }

    #[test]
    fn test_poly_height_on_slope() {
        let mut builder = TileBuilder::new(0, 0, [0.0, -1.0, 0.0], [4.0, 3.0, 4.0]);
        builder
            .add_polygon(
                &[[0.0, 0.0, 0.0], [0.0, 0.0, 4.0], [4.0, 2.0, 4.0], [4.0, 2.0, 0.0]],
                PolyFlags::WALK,
                0,
            )
            .unwrap();
        let (mesh, tile_ref) = NavMesh::from_single_tile(builder.to_bytes().unwrap()).unwrap();
        let h = mesh.get_poly_height(tile_ref, &[2.0, 0.0, 1.0]).unwrap();
        assert_relative_eq!(h, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_off_mesh_connection_links() {
        let mut builder = TileBuilder::new(0, 0, [0.0, -1.0, 0.0], [8.0, 1.0, 8.0]);
        let a = builder
            .add_polygon(
                &[[0.0, 0.0, 0.0], [0.0, 0.0, 2.0], [2.0, 0.0, 2.0], [2.0, 0.0, 0.0]],
                PolyFlags::WALK,
                0,
            )
            .unwrap();
        let b = builder
            .add_polygon(
                &[[6.0, 0.0, 0.0], [6.0, 0.0, 2.0], [8.0, 0.0, 2.0], [8.0, 0.0, 0.0]],
                PolyFlags::WALK,
                0,
            )
            .unwrap();
        builder
            .add_off_mesh_connection([1.0, 0.0, 1.0], [7.0, 0.0, 1.0], 0.5, true, PolyFlags::JUMP, 1)
            .unwrap();
        let (mesh, base) = NavMesh::from_single_tile(builder.to_bytes().unwrap()).unwrap();

        let a_ref = PolyRef::new(base.id() | a as u32);
        let b_ref = PolyRef::new(base.id() | b as u32);
        let con_ref = PolyRef::new(base.id() | 2);

        let (_, con) = mesh.get_tile_and_poly_by_ref(con_ref).unwrap();
        assert_eq!(con.poly_type, PolyType::OffMeshConnection);
        assert!(mesh.poly_neighbours(a_ref, 8).contains(&con_ref));
        assert!(mesh.poly_neighbours(b_ref, 8).contains(&con_ref));

        let (p0, p1) = mesh
            .get_off_mesh_connection_poly_end_points(a_ref, con_ref)
            .unwrap();
        assert_eq!(p0, [1.0, 0.0, 1.0]);
        assert_eq!(p1, [7.0, 0.0, 1.0]);

        let (p0, p1) = mesh
            .get_off_mesh_connection_poly_end_points(b_ref, con_ref)
            .unwrap();
        assert_eq!(p0, [7.0, 0.0, 1.0]);
        assert_eq!(p1, [1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_one_way_off_mesh_connection() {
        let mut builder = TileBuilder::new(0, 0, [0.0, -1.0, 0.0], [8.0, 1.0, 8.0]);
        builder
            .add_polygon(
                &[[0.0, 0.0, 0.0], [0.0, 0.0, 2.0], [2.0, 0.0, 2.0], [2.0, 0.0, 0.0]],
                PolyFlags::WALK,
                0,
            )
            .unwrap();
        builder
            .add_polygon(
                &[[6.0, 0.0, 0.0], [6.0, 0.0, 2.0], [8.0, 0.0, 2.0], [8.0, 0.0, 0.0]],
                PolyFlags::WALK,
                0,
            )
            .unwrap();
        builder
            .add_off_mesh_connection([1.0, 0.0, 1.0], [7.0, 0.0, 1.0], 0.5, false, PolyFlags::JUMP, 1)
            .unwrap();
        let (mesh, base) = NavMesh::from_single_tile(builder.to_bytes().unwrap()).unwrap();

        let con_ref = PolyRef::new(base.id() | 2);
        assert!(mesh.poly_neighbours(PolyRef::new(base.id()), 8).contains(&con_ref));
        assert!(!mesh
            .poly_neighbours(PolyRef::new(base.id() | 1), 8)
            .contains(&con_ref));
    }

    #[test]
    fn test_query_polygons_spans_tiles() {
        let mesh = create_grid_mesh(2, 2);
        let filter = crate::QueryFilter::default();
        let polys = mesh.query_polygons(&[7.0, -1.0, 7.0], &[9.0, 1.0, 9.0], &filter);
        assert_eq!(polys.len(), 4);

        let none = mesh.query_polygons(&[7.0, 5.0, 7.0], &[9.0, 6.0, 9.0], &filter);
        assert!(none.is_empty());
    }
}
