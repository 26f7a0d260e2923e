use super::place::{AdminLevel, PlaceLevel, PlaceType};
use crate::feature::{FeatureBuilder, GeoObjectId, Geometry, NameTable};
use geo::{Area, BooleanOps, BoundingRect, Contains, Coord, MultiPolygon, Point, Rect};

/// An administrative polygon with the side data the hierarchy needs.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: GeoObjectId,
    pub names: NameTable,
    pub admin_level: AdminLevel,
    pub place_type: PlaceType,
    pub iso_code: Option<String>,
    pub label_osm_id: Option<u64>,
    pub label: Option<PlacePoint>,
    geometry: MultiPolygon<f64>,
    bbox: Rect<f64>,
    area: f64,
}

impl Region {
    pub fn new(
        id: GeoObjectId,
        names: NameTable,
        admin_level: AdminLevel,
        place_type: PlaceType,
        iso_code: Option<String>,
        label_osm_id: Option<u64>,
        geometry: MultiPolygon<f64>,
    ) -> Option<Region> {
        let bbox = geometry.bounding_rect()?;
        let area = geometry.unsigned_area();
        if area <= 0.0 {
            return None;
        }
        Some(Region {
            id,
            names,
            admin_level,
            place_type,
            iso_code,
            label_osm_id,
            label: None,
            geometry,
            bbox,
            area,
        })
    }

    pub fn from_feature(fb: &FeatureBuilder) -> Option<Region> {
        let Geometry::Area(area) = &fb.geometry else {
            return None;
        };
        let info = &fb.region_info;
        Region::new(
            fb.id,
            fb.names.clone(),
            AdminLevel(info.admin_level),
            info.place
                .as_deref()
                .map_or(PlaceType::Unknown, PlaceType::from_tag),
            info.iso_code.clone(),
            info.label_osm_id,
            area.clone(),
        )
    }

    pub fn name(&self) -> &str {
        self.names.default_name().unwrap_or_default()
    }

    /// English name with a fallback to the default; countries group by it.
    pub fn international_name(&self) -> &str {
        self.names.get("en").unwrap_or_else(|| self.name())
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn replace_geometry(&mut self, geometry: MultiPolygon<f64>) {
        if let Some(bbox) = geometry.bounding_rect() {
            self.area = geometry.unsigned_area();
            self.bbox = bbox;
            self.geometry = geometry;
        }
    }

    pub fn area(&self) -> f64 {
        self.area
    }

    pub fn bbox(&self) -> Rect<f64> {
        self.bbox
    }

    pub fn center(&self) -> Coord<f64> {
        match &self.label {
            Some(label) => label.point,
            None => self.bbox.center(),
        }
    }

    pub fn contains_rect(&self, other: &Region) -> bool {
        rect_contains(&self.bbox, &other.bbox)
    }

    pub fn contains_point(&self, point: Coord<f64>) -> bool {
        self.geometry.contains(&Point(point))
    }

    /// Geometric containment with a sliver tolerance: `other` counts as
    /// contained when the overlap covers all but polygon-edge noise of it.
    pub fn contains(&self, other: &Region) -> bool {
        if !rects_intersect(&self.bbox, &other.bbox) {
            return false;
        }
        self.overlap_area(other) >= other.area * 0.999
    }

    /// Overlap as a percentage of the smaller region's area.
    pub fn overlap_percentage(&self, other: &Region) -> f64 {
        let smaller = self.area.min(other.area);
        if smaller <= 0.0 || !rects_intersect(&self.bbox, &other.bbox) {
            return 0.0;
        }
        self.overlap_area(other) / smaller * 100.0
    }

    fn overlap_area(&self, other: &Region) -> f64 {
        self.geometry.intersection(&other.geometry).unsigned_area()
    }
}

fn rect_contains(outer: &Rect<f64>, inner: &Rect<f64>) -> bool {
    outer.min().x <= inner.min().x
        && outer.min().y <= inner.min().y
        && outer.max().x >= inner.max().x
        && outer.max().y >= inner.max().y
}

fn rects_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

/// A point feature carrying a place name but no polygon.
#[derive(Debug, Clone)]
pub struct PlacePoint {
    pub id: GeoObjectId,
    pub names: NameTable,
    pub place_type: PlaceType,
    pub point: Coord<f64>,
}

impl PlacePoint {
    pub fn from_feature(fb: &FeatureBuilder) -> Option<PlacePoint> {
        let Geometry::Point(point) = fb.geometry else {
            return None;
        };
        let place = fb.region_info.place.as_deref()?;
        let place_type = PlaceType::from_tag(place);
        if place_type == PlaceType::Unknown {
            return None;
        }
        Some(PlacePoint {
            id: fb.id,
            names: fb.names.clone(),
            place_type,
            point,
        })
    }

    pub fn name(&self) -> &str {
        self.names.default_name().unwrap_or_default()
    }

    pub fn place_level(&self) -> PlaceLevel {
        PlaceLevel::from_place_type(self.place_type)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::rect_region;

    #[test]
    fn overlap_percentage_of_nested_rects() {
        let outer = rect_region(1, "outer", (0.0, 0.0), (10.0, 10.0));
        let inner = rect_region(2, "inner", (2.0, 2.0), (4.0, 4.0));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!((outer.overlap_percentage(&inner) - 100.0).abs() < 1e-6);
    }

    #[test]
    fn partial_overlap() {
        let left = rect_region(1, "left", (0.0, 0.0), (10.0, 10.0));
        let right = rect_region(2, "right", (4.5, 0.0), (14.5, 10.0));
        let overlap = left.overlap_percentage(&right);
        assert!((overlap - 55.0).abs() < 1e-6, "overlap = {overlap}");
        assert!(!left.contains(&right));
    }
}
