use super::cell_id::CellId;
use geo::{Contains, Coord, Intersects, LineString, MultiPolygon, Polygon, Rect};

/// Result of intersecting a geometry with a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellObjectIntersection {
    NoIntersection,
    Intersects,
    CellInsideObject,
    ObjectInsideCell,
}

/// An (encoded cell, object id) pair, the unit the index builder consumes.
/// Ordering is by cell code first so a plain sort produces builder input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CellValuePair {
    pub cell: u64,
    pub value: u64,
}

impl CellValuePair {
    pub fn new(cell: u64, value: u64) -> CellValuePair {
        CellValuePair { cell, value }
    }
}

/// Geometry prepared for covering, already projected into the grid space of
/// its target depth.
#[derive(Debug, Clone)]
pub enum CoveredGeometry {
    Point(Coord<f64>),
    Line(LineString<f64>),
    Area(MultiPolygon<f64>),
}

impl CoveredGeometry {
    pub fn intersect(&self, cell: &CellId, depth: usize) -> CellObjectIntersection {
        let rect = cell.rect(depth);
        match self {
            CoveredGeometry::Point(p) => {
                if rect.intersects(p) {
                    CellObjectIntersection::ObjectInsideCell
                } else {
                    CellObjectIntersection::NoIntersection
                }
            }
            CoveredGeometry::Line(line) => intersect_cell_with_line(&rect, line),
            CoveredGeometry::Area(area) => intersect_cell_with_area(&rect, area),
        }
    }
}

fn intersect_cell_with_line(rect: &Rect<f64>, line: &LineString<f64>) -> CellObjectIntersection {
    if !rect.intersects(line) {
        return CellObjectIntersection::NoIntersection;
    }
    let inside = line.coords().all(|c| rect.intersects(c));
    if inside {
        CellObjectIntersection::ObjectInsideCell
    } else {
        CellObjectIntersection::Intersects
    }
}

fn intersect_cell_with_area(rect: &Rect<f64>, area: &MultiPolygon<f64>) -> CellObjectIntersection {
    if !area.intersects(rect) {
        return CellObjectIntersection::NoIntersection;
    }
    let rect_poly: Polygon<f64> = (*rect).into();
    if area.contains(&rect_poly) {
        return CellObjectIntersection::CellInsideObject;
    }
    if rect_poly.contains(area) {
        return CellObjectIntersection::ObjectInsideCell;
    }
    CellObjectIntersection::Intersects
}

/// Covers a geometry with quadtree cells down to `depth` levels.
///
/// A cell fully inside the object is emitted as-is. A partially covered cell
/// is subdivided unless the wasted area it would keep is below
/// `cell_penalty_area` (in leaf-area units), or unless its own children
/// jointly save less than that penalty. The top of the recursion fans out on
/// the rayon pool; levels below `depth - 9` proceed sequentially, matching a
/// task granularity of a few hundred thousand cells.
pub fn cover_object(
    geometry: &CoveredGeometry,
    cell_penalty_area: u64,
    depth: usize,
) -> Vec<CellId> {
    let paralleling_level = depth.saturating_sub(9) as u8;
    cover_cell(
        geometry,
        cell_penalty_area,
        depth,
        CellId::root(),
        paralleling_level,
    )
}

fn cover_cell(
    geometry: &CoveredGeometry,
    penalty: u64,
    depth: usize,
    cell: CellId,
    paralleling_level: u8,
) -> Vec<CellId> {
    let r = cell.radius(depth);
    let cell_area = r * r;

    match geometry.intersect(&cell, depth) {
        CellObjectIntersection::NoIntersection => return Vec::new(),
        CellObjectIntersection::CellInsideObject => return vec![cell],
        CellObjectIntersection::Intersects | CellObjectIntersection::ObjectInsideCell => {}
    }

    if penalty >= cell_area || cell.level() as usize == depth - 1 {
        return vec![cell];
    }

    let subdiv = if cell.level() < paralleling_level {
        let ((a, b), (c, d)) = rayon::join(
            || {
                rayon::join(
                    || cover_cell(geometry, penalty, depth, cell.child(0), paralleling_level),
                    || cover_cell(geometry, penalty, depth, cell.child(1), paralleling_level),
                )
            },
            || {
                rayon::join(
                    || cover_cell(geometry, penalty, depth, cell.child(2), paralleling_level),
                    || cover_cell(geometry, penalty, depth, cell.child(3), paralleling_level),
                )
            },
        );
        let mut all = a;
        all.extend(b);
        all.extend(c);
        all.extend(d);
        all
    } else {
        let mut all = Vec::new();
        for i in 0..4 {
            all.extend(cover_cell(
                geometry,
                penalty,
                depth,
                cell.child(i),
                paralleling_level,
            ));
        }
        all
    };

    debug_assert!(!subdiv.is_empty());

    let subdiv_area: u64 = subdiv
        .iter()
        .map(|c| {
            let r = c.radius(depth);
            r * r
        })
        .sum();

    // Subdivide only if it saves more empty area than the bookkeeping costs.
    if subdiv.len() > 1 && penalty >= cell_area.saturating_sub(subdiv_area) {
        vec![cell]
    } else {
        subdiv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Coord};

    const DEPTH: usize = 8;
    const PENALTY: u64 = 4;

    fn grid_side(depth: usize) -> f64 {
        (1u64 << depth) as f64
    }

    #[test]
    fn point_cover_is_single_small_cell() {
        let point = Coord { x: 100.5, y: 37.25 };
        let cover = cover_object(&CoveredGeometry::Point(point), PENALTY, DEPTH);
        assert_eq!(cover.len(), 1);
        let cell = cover[0];
        assert!(cell.rect(DEPTH).intersects(&point));
        // The penalty rule stops subdivision once a cell is down to
        // penalty-area size.
        let r = cell.radius(DEPTH);
        assert!(r * r <= PENALTY);
        // The emitted cell is an ancestor of (or equal to) the point's leaf.
        let leaf = CellId::leaf_at(point, DEPTH);
        assert!(cell == leaf || cell.is_ancestor_of(&leaf));
    }

    #[test]
    fn cover_contains_geometry_and_is_antichain() {
        let side = grid_side(DEPTH);
        let area = polygon![
            (x: side * 0.2, y: side * 0.2),
            (x: side * 0.7, y: side * 0.25),
            (x: side * 0.6, y: side * 0.8),
            (x: side * 0.2, y: side * 0.2),
        ];
        let geometry = CoveredGeometry::Area(MultiPolygon::new(vec![area.clone()]));
        let cover = cover_object(&geometry, PENALTY, DEPTH);
        assert!(!cover.is_empty());

        // No two cells of a cover are ancestor and descendant.
        for a in &cover {
            for b in &cover {
                assert!(!a.is_ancestor_of(b), "{a:?} is an ancestor of {b:?}");
            }
        }

        // Interior sample points all fall inside some cover cell.
        use geo::Contains;
        for ix in 0..32 {
            for iy in 0..32 {
                let p = Coord {
                    x: side * (0.15 + 0.7 * ix as f64 / 31.0),
                    y: side * (0.15 + 0.7 * iy as f64 / 31.0),
                };
                if !area.contains(&p) {
                    continue;
                }
                let covered = cover
                    .iter()
                    .any(|c| c.rect(DEPTH).intersects(&p));
                assert!(covered, "point {p:?} escaped the cover");
            }
        }
    }

    #[test]
    fn full_world_area_covers_with_root() {
        let side = grid_side(DEPTH);
        let world = polygon![
            (x: -1.0, y: -1.0),
            (x: side + 1.0, y: -1.0),
            (x: side + 1.0, y: side + 1.0),
            (x: -1.0, y: side + 1.0),
            (x: -1.0, y: -1.0),
        ];
        let cover = cover_object(
            &CoveredGeometry::Area(MultiPolygon::new(vec![world])),
            PENALTY,
            DEPTH,
        );
        assert_eq!(cover, vec![CellId::root()]);
    }

    #[test]
    fn line_cover_follows_segments() {
        let side = grid_side(DEPTH);
        let line = LineString::from(vec![
            (side * 0.1, side * 0.1),
            (side * 0.9, side * 0.12),
        ]);
        let cover = cover_object(&CoveredGeometry::Line(line.clone()), PENALTY, DEPTH);
        assert!(!cover.is_empty());
        for c in &cover {
            let rect = c.rect(DEPTH);
            assert!(line.intersects(&rect) || rect.intersects(&line));
        }
    }
}
