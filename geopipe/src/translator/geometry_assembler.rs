use geo::{Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use geopipe_osm::cache::IntermediateDataReader;
use geopipe_osm::model::RelationElement;

/// Counters for geometry assembly; logged once per stage.
#[derive(Debug, Default)]
pub struct AssemblyStats {
    pub missing_ways: u64,
    pub missing_nodes: u64,
    pub broken_rings: u64,
}

/// Resolves a way's node ids through the point storage into a projected
/// polyline. A missing node invalidates the whole way.
pub fn way_line(
    cache: &IntermediateDataReader,
    node_ids: &[u64],
    stats: &mut AssemblyStats,
) -> Option<LineString<f64>> {
    let mut points = Vec::with_capacity(node_ids.len());
    for &id in node_ids {
        match cache.node(id) {
            Some((y, x)) => points.push(Coord { x, y }),
            None => {
                stats.missing_nodes += 1;
                return None;
            }
        }
    }
    points.dedup();
    if points.len() < 2 {
        return None;
    }
    Some(LineString(points))
}

/// A closed way as a one-ring area.
pub fn closed_way_area(
    cache: &IntermediateDataReader,
    node_ids: &[u64],
    stats: &mut AssemblyStats,
) -> Option<MultiPolygon<f64>> {
    let line = way_line(cache, node_ids, stats)?;
    if line.0.first() != line.0.last() {
        return None;
    }
    if line.0.len() < 4 {
        stats.broken_rings += 1;
        return None;
    }
    Some(MultiPolygon::new(vec![Polygon::new(line, vec![])]))
}

/// Assembles a multipolygon relation: member ways are resolved, stitched
/// into closed rings by shared endpoints, and split into outer rings with
/// their holes. Unstitchable fragments are dropped with a counter bump.
pub fn relation_multipolygon(
    cache: &IntermediateDataReader,
    relation: &RelationElement,
    stats: &mut AssemblyStats,
) -> Option<MultiPolygon<f64>> {
    let mut outer_paths = Vec::new();
    let mut inner_paths = Vec::new();

    for member in &relation.ways {
        let Ok(Some(way)) = cache.way(member.reference) else {
            stats.missing_ways += 1;
            continue;
        };
        let Some(line) = way_line(cache, &way.nodes, stats) else {
            continue;
        };
        match member.role.as_str() {
            "inner" => inner_paths.push(line),
            // Unroled members count as outer, like the planet data has it.
            _ => outer_paths.push(line),
        }
    }

    let outers = stitch_rings(outer_paths, stats);
    if outers.is_empty() {
        return None;
    }
    let inners = stitch_rings(inner_paths, stats);

    // Each hole goes to the first outer ring containing its first vertex.
    let mut polygons: Vec<Polygon<f64>> = outers
        .into_iter()
        .map(|ring| Polygon::new(ring, vec![]))
        .collect();
    for hole in inners {
        let probe = Point(hole.0[0]);
        if let Some(polygon) = polygons.iter_mut().find(|p| p.exterior().contains(&probe)) {
            let mut interiors = polygon.interiors().to_vec();
            interiors.push(hole);
            let exterior = polygon.exterior().clone();
            *polygon = Polygon::new(exterior, interiors);
        }
    }

    Some(MultiPolygon::new(polygons))
}

/// Merges open paths into closed rings by matching endpoints.
fn stitch_rings(mut paths: Vec<LineString<f64>>, stats: &mut AssemblyStats) -> Vec<LineString<f64>> {
    let mut rings = Vec::new();

    while let Some(mut current) = paths.pop() {
        loop {
            if current.0.len() >= 4 && current.0.first() == current.0.last() {
                rings.push(current);
                break;
            }

            let tail = *current.0.last().unwrap();
            let next = paths.iter().position(|candidate| {
                candidate.0.first() == Some(&tail) || candidate.0.last() == Some(&tail)
            });
            let Some(next) = next else {
                stats.broken_rings += 1;
                break;
            };

            let mut segment = paths.swap_remove(next);
            if segment.0.last() == Some(&tail) {
                segment.0.reverse();
            }
            current.0.extend_from_slice(&segment.0[1..]);
        }
    }

    rings
}
