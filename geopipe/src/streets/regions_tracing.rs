use geo::{Coord, LineString};
use geopipe_core::kv::KeyValue;

/// A maximal run of a street polyline lying inside one region.
pub struct PathSegment {
    pub region: KeyValue,
    pub path: LineString<f64>,
}

/// Splits a polyline at region boundaries: each vertex is resolved to its
/// owning region and consecutive vertices sharing a region form a segment.
/// The boundary vertex is kept on both sides so neither segment loses its
/// street end. Vertices outside every region extend the current segment (a
/// street does not end at a small gap in region coverage).
pub fn trace_path_regions<F>(path: &LineString<f64>, region_finder: F) -> Vec<PathSegment>
where
    F: Fn(Coord<f64>) -> Option<KeyValue>,
{
    let mut segments: Vec<PathSegment> = Vec::new();

    for &point in &path.0 {
        let region = region_finder(point);
        let continues_current = match (segments.last(), &region) {
            (Some(segment), Some(region)) => segment.region.0 == region.0,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if continues_current {
            segments.last_mut().unwrap().path.0.push(point);
        } else if let Some(region) = region {
            if let Some(previous) = segments.last_mut() {
                // Keep the crossing point in both segments.
                previous.path.0.push(point);
            }
            segments.push(PathSegment {
                region,
                path: LineString(vec![point]),
            });
        }
    }

    segments.retain(|segment| segment.path.0.len() >= 2);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn finder(point: Coord<f64>) -> Option<KeyValue> {
        // Region 1 owns x < 10, region 2 owns x >= 10.
        let id = if point.x < 10.0 { 1 } else { 2 };
        Some((id, Arc::new(json!({ "region": id }))))
    }

    #[test]
    fn splits_at_region_boundary() {
        let path = LineString::from(vec![(0.0, 0.0), (5.0, 0.0), (12.0, 0.0), (20.0, 0.0)]);
        let segments = trace_path_regions(&path, finder);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].region.0, 1);
        assert_eq!(segments[0].path.0.len(), 3);
        assert_eq!(segments[1].region.0, 2);
        // The crossing vertex opens the second segment too.
        assert_eq!(segments[1].path.0[0], Coord { x: 12.0, y: 0.0 });
    }

    #[test]
    fn single_region_keeps_one_segment() {
        let path = LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
        let segments = trace_path_regions(&path, finder);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].path.0.len(), 3);
    }

    #[test]
    fn unresolved_points_only_produce_nothing() {
        let path = LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]);
        let segments = trace_path_regions(&path, |_| None);
        assert!(segments.is_empty());
    }
}
