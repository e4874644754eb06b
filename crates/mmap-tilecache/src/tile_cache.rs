//! Demand-loaded navigation meshes
//!
//! A [`TileCache`] owns one navigation mesh per map and one per game object
//! model. Map tiles are linked in and out on request; queries run through
//! per-thread [`QueryLease`]s so any number of threads can search the same
//! mesh while another thread streams tiles.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use detour::{NavMesh, NavMeshQuery, NodePool, PolyRef, Status};
use parking_lot::{Mutex, RwLock};

use crate::config::TileCacheConfig;
use crate::coords::TileCoord;
use crate::error::{FormatError, TileError};
use crate::file_format::{read_params_file, read_tile_file};

/// Key under which a model mesh records its only tile
const MODEL_TILE_KEY: u32 = 0;

/// Navigation mesh of one map or model, with its loaded tiles and query pools
struct MapMesh {
    nav_mesh: RwLock<NavMesh>,
    /// Packed coordinate to tile reference; also serializes loads for the mesh
    tiles: Mutex<HashMap<u32, PolyRef>>,
    queries: RwLock<HashMap<ThreadId, Arc<Mutex<NodePool>>>>,
}

impl MapMesh {
    fn new(nav_mesh: NavMesh) -> Self {
        Self {
            nav_mesh: RwLock::new(nav_mesh),
            tiles: Mutex::new(HashMap::new()),
            queries: RwLock::new(HashMap::new()),
        }
    }

    /// Node pool of the calling thread, created on first use
    fn thread_pool(&self, mesh_id: u32, budget: usize) -> Option<Arc<Mutex<NodePool>>> {
        let thread = std::thread::current().id();
        if let Some(pool) = self.queries.read().get(&thread) {
            return Some(Arc::clone(pool));
        }

        let mut queries = self.queries.write();
        if let Some(pool) = queries.get(&thread) {
            return Some(Arc::clone(pool));
        }
        match NodePool::new(budget) {
            Ok(pool) => {
                let pool = Arc::new(Mutex::new(pool));
                queries.insert(thread, Arc::clone(&pool));
                log::debug!("Created query for mesh {} on {:?}", mesh_id, thread);
                Some(pool)
            }
            Err(status) => {
                log::error!(
                    "Failed to create query for mesh {} with {} nodes: {}",
                    mesh_id,
                    budget,
                    status
                );
                None
            }
        }
    }
}

/// Splits add-tile failures into malformed payloads and mesh refusals
fn classify_add_error(path: &Path, mesh_id: u32, coord: TileCoord, status: Status) -> TileError {
    if status.is_data_error() {
        TileError::format(path, FormatError::Payload(status))
    } else {
        TileError::LibraryOp {
            mesh_id,
            coord,
            status,
        }
    }
}

/// Thread-bound access to a query over one mesh
///
/// A lease pins the mesh it was taken for, so unloading the map while the
/// lease is alive leaves it valid but empty. It cannot leave the thread that
/// created it.
pub struct QueryLease<'a> {
    mesh_id: u32,
    mesh: Arc<MapMesh>,
    pool: Arc<Mutex<NodePool>>,
    _cache: PhantomData<&'a TileCache>,
    _not_send: PhantomData<*const ()>,
}

impl QueryLease<'_> {
    /// Map id or model display id the lease was taken for
    pub fn mesh_id(&self) -> u32 {
        self.mesh_id
    }

    /// Runs `f` with a query bound to this thread's node pool
    ///
    /// Tile loads and unloads on the mesh wait until `f` returns. Calling
    /// `with` again from inside `f` deadlocks.
    pub fn with<R>(&self, f: impl FnOnce(&mut NavMeshQuery<'_>) -> R) -> R {
        let nav_mesh = self.mesh.nav_mesh.read();
        let mut pool = self.pool.lock();
        let mut query = NavMeshQuery::new(&nav_mesh, &mut pool);
        f(&mut query)
    }
}

/// Per-map navigation meshes with demand-loaded tiles
pub struct TileCache {
    config: TileCacheConfig,
    maps: RwLock<HashMap<u32, Arc<MapMesh>>>,
    models: RwLock<HashMap<u32, Arc<MapMesh>>>,
    loaded_tiles: AtomicU32,
}

impl TileCache {
    pub fn new(config: TileCacheConfig) -> Self {
        Self {
            config,
            maps: RwLock::new(HashMap::new()),
            models: RwLock::new(HashMap::new()),
            loaded_tiles: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &TileCacheConfig {
        &self.config
    }

    fn map(&self, map_id: u32) -> Option<Arc<MapMesh>> {
        self.maps.read().get(&map_id).cloned()
    }

    fn load_map(&self, map_id: u32) -> Result<Arc<MapMesh>, TileError> {
        if let Some(mesh) = self.map(map_id) {
            return Ok(mesh);
        }

        let params = read_params_file(&self.config.params_path(map_id))?;
        let nav_mesh = NavMesh::new(params).map_err(|status| {
            log::error!("Failed to initialize navigation mesh for map {:03}: {}", map_id, status);
            TileError::LibraryInit {
                mesh_id: map_id,
                status,
            }
        })?;

        let mut maps = self.maps.write();
        let mesh = maps
            .entry(map_id)
            .or_insert_with(|| {
                log::debug!("Loaded navigation parameters for map {:03}", map_id);
                Arc::new(MapMesh::new(nav_mesh))
            })
            .clone();
        Ok(mesh)
    }

    /// Creates the mesh of a map from its parameter file, once
    pub fn ensure_map_loaded(&self, map_id: u32) -> Result<(), TileError> {
        self.load_map(map_id).map(|_| ())
    }

    pub fn is_map_loaded(&self, map_id: u32) -> bool {
        self.maps.read().contains_key(&map_id)
    }

    /// Links the tile at `coord` into the map's mesh
    ///
    /// Returns `Ok(false)` when the tile is already loaded. Loads on the same
    /// map are serialized; loads on different maps run in parallel.
    pub fn load_tile(&self, map_id: u32, coord: TileCoord) -> Result<bool, TileError> {
        loop {
            let mesh = self.load_map(map_id)?;
            let mut tiles = mesh.tiles.lock();
            // unload_map retires the mesh before it takes the tile set.
            if !self.map(map_id).is_some_and(|m| Arc::ptr_eq(&m, &mesh)) {
                drop(tiles);
                log::debug!("Map {:03} was unloaded while loading {}, retrying", map_id, coord);
                continue;
            }
            return self.link_tile(map_id, coord, &mesh, &mut tiles);
        }
    }

    fn link_tile(
        &self,
        map_id: u32,
        coord: TileCoord,
        mesh: &MapMesh,
        tiles: &mut HashMap<u32, PolyRef>,
    ) -> Result<bool, TileError> {
        let key = coord.packed();
        if tiles.contains_key(&key) {
            log::trace!("Tile {:03}{} already loaded", map_id, coord);
            return Ok(false);
        }

        let path = self.config.tile_path(map_id, coord);
        let (header, payload) = read_tile_file(&path)?;
        let tile_ref = mesh
            .nav_mesh
            .write()
            .add_tile(payload)
            .map_err(|status| {
                log::error!("Could not load tile {:03}{}: {}", map_id, coord, status);
                classify_add_error(&path, map_id, coord, status)
            })?;

        tiles.insert(key, tile_ref);
        let total = self.loaded_tiles.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!(
            "Loaded tile {:03}{} (liquids: {}, {} tiles loaded)",
            map_id,
            coord,
            header.uses_liquids,
            total
        );
        Ok(true)
    }

    /// Unlinks the tile at `coord`
    ///
    /// Returns `Ok(false)` when the map or tile was not loaded. A failed
    /// removal still drops the tile from the bookkeeping.
    pub fn unload_tile(&self, map_id: u32, coord: TileCoord) -> Result<bool, TileError> {
        let Some(mesh) = self.map(map_id) else {
            log::debug!("Cannot unload tile {:03}{}: map not loaded", map_id, coord);
            return Ok(false);
        };

        let mut tiles = mesh.tiles.lock();
        let Some(tile_ref) = tiles.remove(&coord.packed()) else {
            log::debug!("Cannot unload tile {:03}{}: tile not loaded", map_id, coord);
            return Ok(false);
        };
        self.loaded_tiles.fetch_sub(1, Ordering::Relaxed);

        let removed = mesh.nav_mesh.write().remove_tile(tile_ref);
        match removed {
            Ok(()) => {
                log::debug!("Unloaded tile {:03}{}", map_id, coord);
                Ok(true)
            }
            Err(status) => {
                log::error!("Could not unload tile {:03}{}: {}", map_id, coord, status);
                Err(TileError::LibraryOp {
                    mesh_id: map_id,
                    coord,
                    status,
                })
            }
        }
    }

    /// Drops a map with all of its tiles and query handles
    ///
    /// Returns `false` when the map was not loaded.
    pub fn unload_map(&self, map_id: u32) -> bool {
        let Some(mesh) = self.maps.write().remove(&map_id) else {
            log::debug!("Cannot unload map {:03}: not loaded", map_id);
            return false;
        };

        let tiles = std::mem::take(&mut *mesh.tiles.lock());
        let mut nav_mesh = mesh.nav_mesh.write();
        for (key, tile_ref) in tiles {
            if let Err(status) = nav_mesh.remove_tile(tile_ref) {
                log::error!(
                    "Could not unload tile {:03}{}: {}",
                    map_id,
                    TileCoord::from_packed(key),
                    status
                );
            }
            self.loaded_tiles.fetch_sub(1, Ordering::Relaxed);
        }
        mesh.queries.write().clear();

        log::debug!("Unloaded map {:03}", map_id);
        true
    }

    /// Drops the query handle `thread` holds for a map
    pub fn unload_map_instance(&self, map_id: u32, thread: ThreadId) -> bool {
        let Some(mesh) = self.map(map_id) else {
            return false;
        };
        let removed = mesh.queries.write().remove(&thread).is_some();
        if removed {
            log::debug!("Dropped query for map {:03} on {:?}", map_id, thread);
        }
        removed
    }

    /// Query handle of the calling thread for a loaded map
    pub fn query_handle(&self, map_id: u32) -> Option<QueryLease<'_>> {
        let mesh = self.map(map_id)?;
        let pool = mesh.thread_pool(map_id, self.config.query_node_budget)?;
        Some(QueryLease {
            mesh_id: map_id,
            mesh,
            pool,
            _cache: PhantomData,
            _not_send: PhantomData,
        })
    }

    /// Number of threads holding a query handle for a map
    pub fn query_handle_count(&self, map_id: u32) -> usize {
        self.map(map_id).map_or(0, |mesh| mesh.queries.read().len())
    }

    /// Loads the single-tile mesh of a game object model
    ///
    /// Returns `Ok(false)` when the model is already loaded.
    pub fn load_model(&self, display_id: u32) -> Result<bool, TileError> {
        if self.models.read().contains_key(&display_id) {
            return Ok(false);
        }

        let path = self.config.model_path(display_id);
        let (_, payload) = read_tile_file(&path)?;
        let (nav_mesh, tile_ref) = NavMesh::from_single_tile(payload).map_err(|status| {
            log::error!("Could not load model {:04}: {}", display_id, status);
            if status.is_data_error() {
                TileError::format(&path, FormatError::Payload(status))
            } else {
                TileError::LibraryInit {
                    mesh_id: display_id,
                    status,
                }
            }
        })?;

        let mut models = self.models.write();
        if models.contains_key(&display_id) {
            return Ok(false);
        }
        let mesh = MapMesh::new(nav_mesh);
        mesh.tiles.lock().insert(MODEL_TILE_KEY, tile_ref);
        models.insert(display_id, Arc::new(mesh));
        log::debug!("Loaded model {:04}", display_id);
        Ok(true)
    }

    pub fn unload_model(&self, display_id: u32) -> bool {
        let removed = self.models.write().remove(&display_id).is_some();
        if removed {
            log::debug!("Unloaded model {:04}", display_id);
        }
        removed
    }

    /// Query handle of the calling thread for a loaded model
    pub fn model_query_handle(&self, display_id: u32) -> Option<QueryLease<'_>> {
        let mesh = self.models.read().get(&display_id).cloned()?;
        let pool = mesh.thread_pool(display_id, self.config.query_node_budget)?;
        Some(QueryLease {
            mesh_id: display_id,
            mesh,
            pool,
            _cache: PhantomData,
            _not_send: PhantomData,
        })
    }

    pub fn has_tile(&self, map_id: u32, coord: TileCoord) -> bool {
        self.map(map_id)
            .is_some_and(|mesh| mesh.tiles.lock().contains_key(&coord.packed()))
    }

    /// Map tiles loaded across all maps
    pub fn loaded_tile_count(&self) -> u32 {
        self.loaded_tiles.load(Ordering::Relaxed)
    }

    pub fn loaded_map_count(&self) -> u32 {
        self.maps.read().len() as u32
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(TileCacheConfig::default())
    }
}
