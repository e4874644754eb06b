//! CLI utility for .mmap navigation meshes

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use mmap_pathfinder::{PathPlanner, PathRequest, PathResult, PathSmoothing};
use mmap_tilecache::file_format::{params_file_name, read_params_file, read_tile_file};
use mmap_tilecache::{FlatWorld, TileCache, TileCacheConfig, TileCoord, MMAP_GRID_COUNT};

/// A CLI utility for inspecting, generating and querying .mmap navigation meshes
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the parameters and tiles of a map
    Info {
        /// Directory holding the .mmap and .mmtile files
        #[clap(long, value_parser, default_value = "mmaps")]
        dir: PathBuf,

        /// Map id
        #[clap(long)]
        map: u32,

        /// Only inspect this tile (x,y)
        #[clap(long, value_parser = parse_tile_coord)]
        tile: Option<TileCoord>,
    },

    /// Find a path between two world positions
    FindPath {
        /// Directory holding the .mmap and .mmtile files
        #[clap(long, value_parser, default_value = "mmaps")]
        dir: PathBuf,

        /// Map id
        #[clap(long)]
        map: u32,

        /// Start position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        start: Vec3,

        /// End position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        end: Vec3,

        /// Return polygon corners instead of a smoothed path
        #[clap(long)]
        straight: bool,

        /// Snap the last point onto the requested end when it is close enough
        #[clap(long)]
        force_destination: bool,

        /// Maximum number of points in the result
        #[clap(long, default_value = "256")]
        max_points: usize,

        /// Output path file
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Write a flat test map
    Generate {
        /// Output directory
        #[clap(long, value_parser, default_value = "mmaps")]
        dir: PathBuf,

        /// Map id
        #[clap(long)]
        map: u32,

        /// Center tile (x,y)
        #[clap(long, value_parser = parse_tile_coord)]
        center: TileCoord,

        /// Tiles written on each side of the center
        #[clap(long, default_value = "1")]
        radius: u16,

        /// Polygons along each tile edge
        #[clap(long, default_value = "4")]
        cells: usize,

        /// Ground height
        #[clap(long, default_value = "0.0")]
        height: f32,
    },
}

/// Parse a comma-separated vector
fn parse_vector(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();

    if parts.len() != 3 {
        return Err(format!(
            "Vector must have 3 components, got {}",
            parts.len()
        ));
    }

    let x = parts[0].parse::<f32>().map_err(|e| e.to_string())?;
    let y = parts[1].parse::<f32>().map_err(|e| e.to_string())?;
    let z = parts[2].parse::<f32>().map_err(|e| e.to_string())?;

    Ok(Vec3::new(x, y, z))
}

/// Parse a comma-separated tile coordinate
fn parse_tile_coord(s: &str) -> Result<TileCoord, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("Tile must be written as x,y, got {s:?}"))?;

    let x = x.trim().parse::<u16>().map_err(|e| e.to_string())?;
    let y = y.trim().parse::<u16>().map_err(|e| e.to_string())?;
    if x >= MMAP_GRID_COUNT || y >= MMAP_GRID_COUNT {
        return Err(format!(
            "Tile [{x},{y}] is outside the {MMAP_GRID_COUNT}x{MMAP_GRID_COUNT} grid"
        ));
    }

    Ok(TileCoord::new(x, y))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Commands::Info { dir, map, tile } => info(&dir, map, tile),
        Commands::FindPath {
            dir,
            map,
            start,
            end,
            straight,
            force_destination,
            max_points,
            output,
        } => {
            let smoothing = if straight {
                PathSmoothing::Straight
            } else {
                PathSmoothing::Smooth
            };
            let request = PathRequest::new(map, start, end)
                .with_smoothing(smoothing)
                .with_force_destination(force_destination)
                .with_point_path_cap(max_points);
            find_path(&dir, &request, output.as_deref())
        }
        Commands::Generate {
            dir,
            map,
            center,
            radius,
            cells,
            height,
        } => generate(&dir, map, center, radius, cells, height),
    }
}

/// Tile coordinates present on disk for a map, sorted
fn list_tiles(dir: &Path, map_id: u32) -> Result<Vec<TileCoord>> {
    let prefix = format!("{map_id:03}");
    let mut coords = Vec::new();

    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(coord) = tile_coord_from_file_name(name, &prefix) {
            coords.push(coord);
        }
    }

    coords.sort_by_key(|c| (c.y, c.x));
    Ok(coords)
}

/// Parses `MMMYYXX.mmtile` for the given map prefix
fn tile_coord_from_file_name(name: &str, prefix: &str) -> Option<TileCoord> {
    let digits = name.strip_suffix(".mmtile")?.strip_prefix(prefix)?;
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let y = digits[..2].parse().ok()?;
    let x = digits[2..].parse().ok()?;
    Some(TileCoord::new(x, y))
}

/// Print the parameters and tiles of a map
fn info(dir: &Path, map_id: u32, tile: Option<TileCoord>) -> Result<()> {
    let params_path = dir.join(params_file_name(map_id));
    let params = read_params_file(&params_path)?;

    println!("Map {:03} ({})", map_id, params_path.display());
    println!(
        "  origin: {:.3},{:.3},{:.3}",
        params.origin[0], params.origin[1], params.origin[2]
    );
    println!("  tile size: {} x {}", params.tile_width, params.tile_height);
    println!(
        "  max tiles: {}, max polygons per tile: {}",
        params.max_tiles, params.max_polys_per_tile
    );

    let coords = match tile {
        Some(coord) => vec![coord],
        None => list_tiles(dir, map_id)?,
    };
    println!("{} tile file(s)", coords.len());

    let cache = TileCache::new(TileCacheConfig::new(dir));
    let mut failed = 0;
    for coord in coords {
        let path = cache.config().tile_path(map_id, coord);
        let header = match read_tile_file(&path) {
            Ok((header, _)) => header,
            Err(e) => {
                println!("  {}: {}", coord, e);
                failed += 1;
                continue;
            }
        };

        match cache.load_tile(map_id, coord) {
            Ok(_) => println!(
                "  {}: {} bytes, liquids: {}",
                coord,
                header.size,
                if header.uses_liquids { "yes" } else { "no" }
            ),
            Err(e) => {
                println!("  {}: {}", coord, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} tile(s) could not be loaded", failed);
    }
    Ok(())
}

/// Find a path on a map
fn find_path(dir: &Path, request: &PathRequest, output: Option<&Path>) -> Result<()> {
    let cache = TileCache::new(TileCacheConfig::new(dir));
    cache
        .ensure_map_loaded(request.map_id)
        .with_context(|| format!("Failed to load map {:03}", request.map_id))?;

    println!(
        "Finding path from {:?} to {:?}...",
        request.start, request.end
    );

    let planner = PathPlanner::new(&cache);
    let result = planner.calculate(request)?;

    println!(
        "Path type {:?}, {} points, {} polygons, length {:.3}",
        result.path_type,
        result.points.len(),
        result.corridor.len(),
        result.length()
    );

    match output {
        Some(output_path) => {
            println!("Saving path to {}...", output_path.display());
            let mut file = File::create(output_path).with_context(|| {
                format!("Failed to create output file: {}", output_path.display())
            })?;
            write_path(&mut file, &result)?;
        }
        None => {
            let stdout = std::io::stdout();
            write_path(&mut stdout.lock(), &result)?;
        }
    }

    Ok(())
}

fn write_path<W: Write>(out: &mut W, result: &PathResult) -> Result<()> {
    writeln!(out, "# Path from {:?} to {:?}", result.start, result.end)?;
    writeln!(out, "# {:?}", result.path_type)?;
    writeln!(out, "# {} waypoints", result.points.len())?;
    for point in &result.points {
        writeln!(out, "{},{},{}", point.x, point.y, point.z)?;
    }
    Ok(())
}

/// Write a flat test map
fn generate(
    dir: &Path,
    map_id: u32,
    center: TileCoord,
    radius: u16,
    cells: usize,
    height: f32,
) -> Result<()> {
    if cells == 0 {
        return Err(anyhow!("A tile needs at least one cell"));
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let world = FlatWorld::new(map_id)
        .with_cells_per_tile(cells)
        .with_height(height);
    let written = world.write_area(dir, center, radius)?;

    println!(
        "Wrote {} tile(s) of map {:03} to {}",
        written.len(),
        map_id,
        dir.display()
    );
    Ok(())
}
