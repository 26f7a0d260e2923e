use super::place::{PlaceLevel, PlaceType};
use super::region::Region;
use super::tree::{Forest, LevelRegion};
use geo::BooleanOps;
use geopipe_core::mercator;

/// Country-local placement rules. The default body suits most countries;
/// countries with contested or irregular admin subdivisions override.
pub trait CountrySpecifier: Sync + Send {
    /// Level for a region this country's rules recognize; Unknown defers to
    /// the generic admin-level table.
    fn specific_country_level(&self, _region: &Region) -> PlaceLevel {
        PlaceLevel::Unknown
    }

    /// Tie-break for same-size overlapping regions: -1 puts `l` under `r`,
    /// 1 puts `r` under `l`, 0 leaves them unrelated.
    fn relate_by_weight(&self, _l: &LevelRegion, _r: &LevelRegion) -> i32 {
        0
    }

    /// Fix-ups of the country outer polygons before tree building.
    fn rectify_boundary(&self, _outers: &mut Vec<Region>, _planet: &[Region]) {}

    /// Post-pass over the built trees.
    fn adjust_regions_level(&self, _forest: &mut Forest) {}

    fn level(&self, region: &Region) -> PlaceLevel {
        let by_place = PlaceLevel::from_place_type(region.place_type);
        if by_place != PlaceLevel::Unknown {
            return by_place;
        }
        let specific = self.specific_country_level(region);
        if specific != PlaceLevel::Unknown {
            return specific;
        }
        match region.admin_level.get() {
            Some(2) => PlaceLevel::Country,
            Some(3) | Some(4) => PlaceLevel::Region,
            Some(5) | Some(6) => PlaceLevel::Subregion,
            Some(7) | Some(8) => PlaceLevel::Locality,
            Some(9) | Some(10) => PlaceLevel::Suburb,
            Some(11) | Some(12) => PlaceLevel::Sublocality,
            _ => PlaceLevel::Unknown,
        }
    }
}

pub fn make_country_specifier(country_name: &str) -> Box<dyn CountrySpecifier> {
    match country_name {
        "China" => Box::new(ChinaSpecifier),
        "Hungary" => Box::new(HungarySpecifier),
        "Ukraine" => Box::new(UkraineSpecifier),
        _ => Box::new(DefaultSpecifier),
    }
}

struct DefaultSpecifier;

impl CountrySpecifier for DefaultSpecifier {}

struct ChinaSpecifier;

impl CountrySpecifier for ChinaSpecifier {
    fn specific_country_level(&self, region: &Region) -> PlaceLevel {
        match region.admin_level.get() {
            Some(3) => PlaceLevel::Region,     // Hong Kong, Macau
            Some(4) => PlaceLevel::Region,     // provinces
            Some(6) => PlaceLevel::Subregion,  // counties
            Some(8) => PlaceLevel::Subregion,  // townships and subdistricts
            Some(10) => PlaceLevel::Locality,  // villages
            _ => PlaceLevel::Unknown,
        }
    }
}

struct HungarySpecifier;

impl CountrySpecifier for HungarySpecifier {
    fn specific_country_level(&self, region: &Region) -> PlaceLevel {
        match region.admin_level.get() {
            Some(4) => PlaceLevel::Region,
            Some(6) => PlaceLevel::Subregion,
            Some(8) => PlaceLevel::Locality,
            _ => PlaceLevel::Unknown,
        }
    }
}

/// Oblast/raion levels plus the Crimea and Sevastopol carve-outs: both are
/// mapped by RU-affiliated polygons that overlap the Ukrainian outer, so the
/// outer is clipped before parenting runs.
struct UkraineSpecifier;

impl UkraineSpecifier {
    const CRIMEA_LABEL: (f64, f64) = (45.1890034, 34.7401104);
    const SEVASTOPOL_LABEL: (f64, f64) = (44.5547288, 33.4720239);

    fn find_correcting_region<'p>(
        planet: &'p [Region],
        names: &[&str],
        label: (f64, f64),
    ) -> Option<&'p Region> {
        let check_point = mercator::from_lat_lon(label.0, label.1);
        planet.iter().find(|region| {
            region.admin_level.get().is_some()
                && region.iso_code.as_deref() == Some("RU")
                && names.contains(&region.name())
                && region.contains_point(check_point)
        })
    }

    fn exclude_region_area(outers: &mut [Region], correcting: &Region) {
        for outer in outers.iter_mut() {
            let clipped = outer.geometry().difference(correcting.geometry());
            outer.replace_geometry(clipped);
        }
    }
}

impl CountrySpecifier for UkraineSpecifier {
    fn specific_country_level(&self, region: &Region) -> PlaceLevel {
        match region.admin_level.get() {
            Some(4) => PlaceLevel::Region,       // oblasts
            Some(6) => PlaceLevel::Subregion,    // raions
            Some(7) => PlaceLevel::Sublocality,  // city districts
            _ => PlaceLevel::Unknown,
        }
    }

    fn rectify_boundary(&self, outers: &mut Vec<Region>, planet: &[Region]) {
        for (names, label) in [
            (
                &["Республика Крым", "Крым"][..],
                Self::CRIMEA_LABEL,
            ),
            (&["Севастополь"][..], Self::SEVASTOPOL_LABEL),
        ] {
            match Self::find_correcting_region(planet, names, label) {
                Some(region) => Self::exclude_region_area(outers, region),
                None => log::warn!("failed to rectify Ukraine boundary near {label:?}"),
            }
        }
    }
}

/// Marks administrative areas that ended up inside a locality as suburbs:
/// a boundary below a city is a suburb regardless of its admin level, and
/// anything below a suburb is a sublocality.
pub fn mark_admin_suburbs(forest: &mut Forest) {
    let roots: Vec<_> = forest.roots().to_vec();
    for root in roots {
        mark_below(forest, root, false, false);
    }
}

fn mark_below(forest: &mut Forest, node: usize, inside_locality: bool, inside_suburb: bool) {
    let level = forest.get(node).level;
    let is_admin_area = forest
        .get(node)
        .polygon()
        .is_some_and(|r| r.place_type == PlaceType::Unknown);

    if inside_locality && is_admin_area && level != PlaceLevel::Sublocality {
        forest.get_mut(node).level = if inside_suburb {
            PlaceLevel::Sublocality
        } else {
            PlaceLevel::Suburb
        };
    }

    let now_locality = inside_locality || level == PlaceLevel::Locality;
    let now_suburb =
        inside_suburb || matches!(forest.get(node).level, PlaceLevel::Suburb | PlaceLevel::Sublocality);
    let children: Vec<_> = forest.children(node).to_vec();
    for child in children {
        mark_below(forest, child, now_locality, now_suburb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::region::test_support::rect_region;
    use crate::regions::tree::LevelRegion;

    #[test]
    fn ukraine_levels_follow_admin_levels() {
        let specifier = make_country_specifier("Ukraine");
        let mut oblast = rect_region(1, "Львівська область", (0.0, 0.0), (10.0, 10.0));
        oblast.admin_level = crate::regions::AdminLevel(Some(4));
        assert_eq!(specifier.level(&oblast), PlaceLevel::Region);

        let mut raion = rect_region(2, "Район", (0.0, 0.0), (2.0, 2.0));
        raion.admin_level = crate::regions::AdminLevel(Some(6));
        assert_eq!(specifier.level(&raion), PlaceLevel::Subregion);
    }

    #[test]
    fn admin_areas_inside_a_locality_become_suburbs() {
        let mut forest = Forest::new();
        let city = forest.add_root(LevelRegion::from_region(
            PlaceLevel::Locality,
            rect_region(1, "City", (0.0, 0.0), (10.0, 10.0)),
        ));
        // An admin boundary that the level table put at locality level.
        let mut district = rect_region(2, "Inner admin area", (2.0, 2.0), (4.0, 4.0));
        district.admin_level = crate::regions::AdminLevel(Some(8));
        let district = forest.add_node(LevelRegion::from_region(PlaceLevel::Locality, district));
        forest.set_parent(district, city);

        let mut deeper = rect_region(3, "Deeper admin area", (2.5, 2.5), (3.0, 3.0));
        deeper.admin_level = crate::regions::AdminLevel(Some(10));
        let deeper = forest.add_node(LevelRegion::from_region(PlaceLevel::Suburb, deeper));
        forest.set_parent(deeper, district);

        mark_admin_suburbs(&mut forest);
        assert_eq!(forest.get(city).level, PlaceLevel::Locality);
        assert_eq!(forest.get(district).level, PlaceLevel::Suburb);
        assert_eq!(forest.get(deeper).level, PlaceLevel::Sublocality);
    }
}
