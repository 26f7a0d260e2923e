use crate::feature::RegionInfo;
use geopipe_osm::model::{EntityKind, OsmElement};

const POI_KEYS: [&str; 7] = [
    "amenity", "shop", "tourism", "leisure", "office", "craft", "historic",
];

/// An administrative boundary or a place polygon candidate.
pub fn is_region_candidate(element: &OsmElement) -> bool {
    if element.is_node() {
        return false;
    }
    if element.has_tag_value("boundary", "administrative") && element.has_tag("admin_level") {
        return true;
    }
    element
        .tag("place")
        .is_some_and(|p| crate::regions::PlaceType::from_tag(p) != crate::regions::PlaceType::Unknown)
}

/// A named point carrying a place kind.
pub fn is_place_point(element: &OsmElement) -> bool {
    element.is_node()
        && element.has_tag("name")
        && element.tag("place").is_some_and(|p| {
            crate::regions::PlaceType::from_tag(p)
                != crate::regions::PlaceType::Unknown
        })
}

/// A street-like element: a named highway way or relation, or a named
/// square.
pub fn is_street(element: &OsmElement) -> bool {
    if element.tag("name").unwrap_or_default().is_empty() {
        return false;
    }
    if element.has_tag("highway") && (element.is_way() || element.is_relation()) {
        return true;
    }
    element.has_tag_value("place", "square")
}

pub fn is_building(element: &OsmElement) -> bool {
    element.has_tag("building")
}

pub fn has_house(element: &OsmElement) -> bool {
    element
        .tag("addr:housenumber")
        .is_some_and(|h| !h.trim().is_empty())
}

pub fn is_poi(element: &OsmElement) -> bool {
    element.has_tag("name") && POI_KEYS.iter().any(|key| element.has_tag(key))
}

/// Extracts the administrative side data of a region candidate.
pub fn region_info(element: &OsmElement) -> RegionInfo {
    let iso_code = element
        .tag("ISO3166-1:alpha2")
        .map(str::to_string)
        .or_else(|| {
            element
                .tag("ISO3166-2")
                .map(|code| code.split('-').next().unwrap_or(code).to_string())
        });

    let label_osm_id = element
        .members
        .iter()
        .find(|m| m.kind == EntityKind::Node && (m.role == "label" || m.role == "admin_centre"))
        .map(|m| m.reference);

    RegionInfo {
        admin_level: element
            .tag("admin_level")
            .and_then(|v| v.trim().parse().ok())
            .filter(|&v: &u8| (1..=12).contains(&v)),
        place: element.tag("place").map(str::to_string),
        iso_code,
        label_osm_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(kind: EntityKind, tags: &[(&str, &str)]) -> OsmElement {
        let mut e = OsmElement {
            kind,
            id: 1,
            ..OsmElement::default()
        };
        for (k, v) in tags {
            e.add_tag(*k, *v);
        }
        e
    }

    #[test]
    fn street_classification() {
        let named_highway = element(
            EntityKind::Way,
            &[("highway", "residential"), ("name", "Arbat Street")],
        );
        assert!(is_street(&named_highway));

        let unnamed_highway = element(EntityKind::Way, &[("highway", "residential")]);
        assert!(!is_street(&unnamed_highway));

        let square = element(
            EntityKind::Way,
            &[("place", "square"), ("name", "New Square")],
        );
        assert!(is_street(&square));

        let named_node = element(EntityKind::Node, &[("highway", "bus_stop"), ("name", "x")]);
        assert!(!is_street(&named_node));
    }

    #[test]
    fn region_candidates() {
        let boundary = element(
            EntityKind::Relation,
            &[("boundary", "administrative"), ("admin_level", "4")],
        );
        assert!(is_region_candidate(&boundary));
        assert_eq!(region_info(&boundary).admin_level, Some(4));

        let place_point = element(EntityKind::Node, &[("place", "city"), ("name", "London")]);
        assert!(is_place_point(&place_point));
        assert!(!is_region_candidate(&place_point));
    }

    #[test]
    fn iso_code_from_subdivision_tag() {
        let region = element(
            EntityKind::Relation,
            &[
                ("boundary", "administrative"),
                ("admin_level", "4"),
                ("ISO3166-2", "US-PR"),
            ],
        );
        assert_eq!(region_info(&region).iso_code.as_deref(), Some("US"));
    }

    #[test]
    fn building_and_poi() {
        let house = element(
            EntityKind::Way,
            &[("building", "yes"), ("addr:housenumber", "7 к2")],
        );
        assert!(is_building(&house));
        assert!(has_house(&house));

        let cafe = element(EntityKind::Node, &[("amenity", "cafe"), ("name", "Кофейня")]);
        assert!(is_poi(&cafe));
        assert!(!is_building(&cafe));
    }
}
