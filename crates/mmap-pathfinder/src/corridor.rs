//! Corridor repair after a surface move

use detour::PolyRef;

/// Neighbours looked up for a shortcut fixup
pub const MAX_SHORTCUT_NEIGHBOURS: usize = 16;

/// Corridor polygons a shortcut may skip to
const SHORTCUT_LOOKAHEAD: usize = 6;

/// Replaces the corridor head with the polygons a move actually visited
///
/// Finds the furthest corridor polygon that was also visited and splices the
/// visited polygons, newest first, in front of the rest of the corridor. The
/// corridor is left alone when the two share no polygon.
pub fn fixup_corridor(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let common = path
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, poly)| visited.iter().position(|v| v == poly).map(|j| (i, j)));
    let Some((furthest_path, furthest_visited)) = common else {
        return;
    };

    let keep_from = (furthest_path + 1).min(path.len());
    let mut merged: Vec<PolyRef> = visited[furthest_visited..].iter().rev().copied().collect();
    let room = max_path.saturating_sub(merged.len());
    merged.extend(path[keep_from..].iter().take(room).copied());
    merged.truncate(max_path);
    *path = merged;
}

/// Skips corridor polygons when a neighbour of the head appears a few steps ahead
pub fn fixup_shortcuts(path: &mut Vec<PolyRef>, neighbours: &[PolyRef]) {
    if path.len() < 3 {
        return;
    }

    let lookahead = SHORTCUT_LOOKAHEAD.min(path.len());
    let cut = (2..lookahead).rev().find(|&i| neighbours.contains(&path[i]));
    if let Some(cut) = cut {
        path.drain(1..cut);
    }
}
