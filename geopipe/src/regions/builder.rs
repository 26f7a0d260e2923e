use super::place::{AdminLevel, PlaceLevel, PlaceType};
use super::region::{PlacePoint, Region};
use super::specifier::{make_country_specifier, mark_admin_suburbs, CountrySpecifier};
use super::tree::{Forest, LevelRegion, NodeId};
use crate::feature::{FeatureTypes, Geometry};
use crate::GeneratorError;
use itertools::Itertools;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Relative area tolerance absorbing polygon-edge noise.
const AREA_RELATIVE_ERROR_PERCENT: f64 = 0.1;

pub fn is_area_less_rely(l: &Region, r: &Region) -> bool {
    let ratio = 1.0 + AREA_RELATIVE_ERROR_PERCENT / 100.0;
    ratio * l.area() < r.area()
}

/// Reads the classified regions `.tmp`: administrative polygons become
/// `Region`s, named place points go to a side map keyed by their OSM id.
pub fn load_regions(
    path: &Path,
) -> Result<(Vec<Region>, HashMap<u64, PlacePoint>), GeneratorError> {
    let mut regions = Vec::new();
    let mut place_points = HashMap::new();
    let mut broken = 0u64;

    crate::feature::for_each_feature(path, |fb, _offset| {
        match &fb.geometry {
            Geometry::Area(_) => {
                if fb.name().is_none() {
                    return Ok(());
                }
                match Region::from_feature(&fb) {
                    Some(region) => regions.push(region),
                    None => broken += 1,
                }
            }
            Geometry::Point(_) if fb.types.has(FeatureTypes::PLACE) => {
                if let Some(point) = PlacePoint::from_feature(&fb) {
                    place_points.insert(point.id.serial(), point);
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    if broken > 0 {
        log::warn!("skipped {broken} region polygons with degenerate geometry");
    }
    Ok((regions, place_points))
}

/// Builds per-country trees of administrative regions from a flat bag of
/// polygons; countries build in parallel on the rayon pool.
pub struct RegionsBuilder {
    threads_count: usize,
    regions_in_area_order: Vec<Region>,
    countries_outers: Vec<Region>,
    place_points: HashMap<u64, PlacePoint>,
}

impl RegionsBuilder {
    pub fn new(
        mut regions: Vec<Region>,
        mut place_points: HashMap<u64, PlacePoint>,
        threads_count: usize,
    ) -> RegionsBuilder {
        place_points.retain(|_, point| !is_ascii_numeric(point.name()));

        Self::move_label_place_points(&mut place_points, &mut regions);

        // Descending area, ids break ties.
        regions.sort_by(|l, r| {
            r.area()
                .partial_cmp(&l.area())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| l.id.cmp(&r.id))
        });

        let countries_outers = Self::extract_countries_outers(&mut regions);

        RegionsBuilder {
            threads_count: threads_count.max(1),
            regions_in_area_order: regions,
            countries_outers,
            place_points,
        }
    }

    fn move_label_place_points(place_points: &mut HashMap<u64, PlacePoint>, regions: &mut [Region]) {
        let mut consumed = HashSet::new();
        for region in regions.iter_mut() {
            let Some(label_id) = region.label_osm_id else {
                continue;
            };
            let Some(label) = place_points.get(&label_id) else {
                continue;
            };
            // A country label belongs to a country outer only.
            if label.place_type == PlaceType::Country && region.admin_level != AdminLevel::TWO {
                continue;
            }
            region.label = Some(label.clone());
            consumed.insert(label_id);
        }
        place_points.retain(|id, _| !consumed.contains(id));
    }

    fn extract_countries_outers(regions: &mut Vec<Region>) -> Vec<Region> {
        let is_country = |region: &Region| {
            region.place_type == PlaceType::Country
                || (region.admin_level == AdminLevel::TWO
                    && region.place_type == PlaceType::Unknown)
        };
        let outers = regions.iter().filter(|r| is_country(r)).cloned().collect();
        regions.retain(|r| !is_country(r));
        outers
    }

    pub fn countries_outers(&self) -> &[Region] {
        &self.countries_outers
    }

    pub fn country_international_names(&self) -> Vec<String> {
        self.countries_outers
            .iter()
            .map(|c| c.international_name().to_string())
            .unique()
            .collect_vec()
    }

    /// Builds all countries, invoking `f` with each finished forest. Builds
    /// run on the rayon pool; `f` runs sequentially on the caller.
    pub fn for_each_country<F>(&self, mut f: F)
    where
        F: FnMut(&str, Forest),
    {
        let names = self.country_international_names();
        log::info!(
            "building {} countries on {} threads",
            names.len(),
            self.threads_count
        );
        let forests: Vec<(String, Forest)> = names
            .par_iter()
            .map(|name| (name.clone(), self.build_country(name)))
            .collect();
        for (name, forest) in forests {
            f(&name, forest);
        }
    }

    pub fn build_country(&self, country_name: &str) -> Forest {
        let specifier = make_country_specifier(country_name);

        let mut outers: Vec<Region> = self
            .countries_outers
            .iter()
            .filter(|c| c.international_name() == country_name)
            .cloned()
            .collect();
        specifier.rectify_boundary(&mut outers, &self.regions_in_area_order);

        let country_code = outers
            .iter()
            .find_map(|o| o.iso_code.as_deref())
            .map(|code| sovereign_country_code(code).to_string());

        let mut forest = Forest::new();
        for outer in outers {
            self.build_country_region_tree(
                outer,
                country_code.as_deref(),
                specifier.as_ref(),
                &mut forest,
            );
        }

        log::info!("start integrating place points for {country_name}");
        self.integrate_place_points(&mut forest);
        log::info!("finish integrating place points for {country_name}");

        mark_admin_suburbs(&mut forest);
        specifier.adjust_regions_level(&mut forest);

        forest
    }

    fn build_country_region_tree(
        &self,
        outer: Region,
        country_code: Option<&str>,
        specifier: &dyn CountrySpecifier,
        forest: &mut Forest,
    ) {
        // Candidate nodes in descending area order, the country outer first.
        let mut candidates: Vec<LevelRegion> =
            vec![LevelRegion::from_region(PlaceLevel::Country, outer)];
        let outer_region = candidates[0].polygon().unwrap().clone();

        for region in &self.regions_in_area_order {
            if !outer_region.contains_rect(region) {
                continue;
            }
            if let (Some(region_iso), Some(code)) = (region.iso_code.as_deref(), country_code) {
                if sovereign_country_code(region_iso) != code {
                    continue;
                }
            }
            let level = if is_ascii_numeric(region.name()) {
                PlaceLevel::Unknown
            } else {
                specifier.level(region)
            };
            candidates.push(LevelRegion::from_region(level, region.clone()));
        }

        let node_ids: Vec<NodeId> = candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                if i == 0 {
                    forest.add_root(candidate.clone())
                } else {
                    forest.add_node(candidate.clone())
                }
            })
            .collect();

        // Smallest first: every region picks the smallest candidate that
        // contains it among the already larger ones.
        for item in (1..candidates.len()).rev() {
            if let Some(parent) = self.choose_parent(&candidates, item, specifier) {
                forest.set_parent(node_ids[item], node_ids[parent]);
            }
        }
    }

    fn choose_parent(
        &self,
        candidates: &[LevelRegion],
        item: usize,
        specifier: &dyn CountrySpecifier,
    ) -> Option<usize> {
        let region = candidates[item].polygon().unwrap();

        // Candidates sit in descending area order; scanning indices in
        // reverse visits them smallest first. Reliably-smaller ones are
        // skipped, so the walk starts at near-equal areas and proceeds to
        // ever larger candidates, keeping the smallest container found.
        let mut parent: Option<usize> = None;
        for i in (0..candidates.len()).rev() {
            if i == item {
                continue;
            }
            let candidate = candidates[i].polygon().unwrap();
            if is_area_less_rely(candidate, region) {
                continue;
            }

            if let Some(p) = parent {
                // Past the parent's size class nothing smaller can appear.
                if is_area_less_rely(candidates[p].polygon().unwrap(), candidate) {
                    break;
                }
            }

            if !candidate.contains_rect(region) && !candidate.contains_point(region.center()) {
                continue;
            }

            if compare_affiliation(&candidates[i], &candidates[item], specifier) == 1 {
                if let Some(p) = parent {
                    if compare_affiliation(&candidates[i], &candidates[p], specifier) >= 0 {
                        continue;
                    }
                }
                parent = Some(i);
            }
        }
        parent
    }

    fn integrate_place_points(&self, forest: &mut Forest) {
        for point in self.place_points.values() {
            if point.place_level() == PlaceLevel::Unknown {
                continue;
            }
            let Some(host) = deepest_containing_node(forest, point) else {
                continue;
            };
            if has_equivalent_region(forest, host, point) {
                continue;
            }
            let node = forest.add_node(LevelRegion::from_place_point(point.clone()));
            forest.set_parent(node, host);
        }
    }
}

fn deepest_containing_node(forest: &Forest, point: &PlacePoint) -> Option<NodeId> {
    let mut deepest = None;
    forest.for_each(|node| {
        if let Some(region) = forest.get(node).polygon() {
            if region.contains_point(point.point) {
                deepest = Some(node);
            }
        }
    });
    deepest
}

fn has_equivalent_region(forest: &Forest, host: NodeId, point: &PlacePoint) -> bool {
    let level = point.place_level();
    let mut chain = vec![host];
    chain.extend(forest.ancestors(host));
    chain
        .into_iter()
        .any(|node| forest.get(node).level == level && forest.get(node).name() == point.name())
}

/// Affiliation of two placed regions: 1 when `l` should parent `r`, -1 for
/// the converse, 0 for unrelated.
pub fn compare_affiliation(
    l: &LevelRegion,
    r: &LevelRegion,
    specifier: &dyn CountrySpecifier,
) -> i32 {
    let (Some(lr), Some(rr)) = (l.polygon(), r.polygon()) else {
        return 0;
    };

    if is_area_less_rely(rr, lr) && lr.contains(rr) {
        return 1;
    }
    if is_area_less_rely(lr, rr) && rr.contains(lr) {
        return -1;
    }

    if lr.overlap_percentage(rr) < 50.0 {
        return 0;
    }

    if 0.5 * lr.area() > rr.area() {
        log::debug!("region {} contains partly {}", lr.name(), rr.name());
        return 1;
    }
    if 0.5 * rr.area() > lr.area() {
        log::debug!("region {} contains partly {}", rr.name(), lr.name());
        return -1;
    }

    specifier.relate_by_weight(l, r)
}

fn is_ascii_numeric(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Dependent-territory ISO codes map onto their sovereign's code, so Puerto
/// Rico ends up under the US tree and French Guiana under France's.
pub fn sovereign_country_code(iso_code: &str) -> &str {
    match iso_code {
        "AX" => "FI",
        "AS" | "GU" | "MP" | "PR" | "UM" | "VI" => "US",
        "AI" | "BM" | "IO" | "KY" | "FK" | "GI" | "MS" | "PN" | "SH" | "GS" | "TC" | "VG" => "GB",
        "AW" | "BQ" | "CW" | "SX" => "NL",
        "BV" | "SJ" => "NO",
        "CX" | "CC" | "HM" | "NF" => "AU",
        "CK" | "NU" | "TK" => "NZ",
        "GF" | "PF" | "TF" | "GP" | "MQ" | "YT" | "NC" | "RE" | "BL" | "MF" | "PM" | "WF" => "FR",
        "GL" => "DK",
        "HK" | "MO" => "CN",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::region::test_support::rect_region;

    struct Plain;
    impl CountrySpecifier for Plain {}

    fn level(region: Region, level: PlaceLevel) -> LevelRegion {
        LevelRegion::from_region(level, region)
    }

    #[test]
    fn bbox_contained_region_with_majority_overlap_is_child() {
        let country = level(
            rect_region(1, "Country", (0.0, 0.0), (100.0, 100.0)),
            PlaceLevel::Country,
        );
        // 55% of this rect lies inside the country.
        let majority = level(
            rect_region(2, "Border region", (94.5, 0.0), (104.5, 10.0)),
            PlaceLevel::Region,
        );
        assert_eq!(compare_affiliation(&country, &majority, &Plain), 1);

        let builder = RegionsBuilder::new(Vec::new(), HashMap::new(), 1);
        let candidates = vec![country.clone(), majority.clone()];
        assert_eq!(builder.choose_parent(&candidates, 1, &Plain), Some(0));
    }

    #[test]
    fn minority_overlap_means_unrelated() {
        let country = level(
            rect_region(1, "Country", (0.0, 0.0), (100.0, 100.0)),
            PlaceLevel::Country,
        );
        // Only 45% inside.
        let minority = level(
            rect_region(2, "Neighbour", (95.5, 0.0), (105.5, 10.0)),
            PlaceLevel::Region,
        );
        assert_eq!(compare_affiliation(&country, &minority, &Plain), 0);

        let builder = RegionsBuilder::new(Vec::new(), HashMap::new(), 1);
        let candidates = vec![country.clone(), minority.clone()];
        assert_eq!(builder.choose_parent(&candidates, 1, &Plain), None);
    }

    #[test]
    fn affiliation_is_antisymmetric() {
        let rects = [
            rect_region(1, "a", (0.0, 0.0), (100.0, 100.0)),
            rect_region(2, "b", (10.0, 10.0), (60.0, 60.0)),
            rect_region(3, "c", (40.0, 40.0), (90.0, 90.0)),
            rect_region(4, "d", (200.0, 200.0), (201.0, 201.0)),
            rect_region(5, "e", (0.0, 0.0), (100.0, 100.0)),
        ];
        for l in &rects {
            for r in &rects {
                if l.id == r.id {
                    continue;
                }
                let lv = level(l.clone(), PlaceLevel::Region);
                let rv = level(r.clone(), PlaceLevel::Region);
                let ab = compare_affiliation(&lv, &rv, &Plain);
                let ba = compare_affiliation(&rv, &lv, &Plain);
                assert!(
                    !(ab == 1 && ba == 1),
                    "both {} and {} claim parenthood",
                    l.name(),
                    r.name()
                );
            }
        }
    }

    #[test]
    fn nested_rects_build_a_chain() {
        let country = rect_region(1, "Country", (0.0, 0.0), (100.0, 100.0));
        let state = rect_region(2, "State", (10.0, 10.0), (60.0, 60.0));
        let city = rect_region(3, "City", (20.0, 20.0), (30.0, 30.0));

        let builder = RegionsBuilder::new(
            vec![state.clone(), city.clone()],
            HashMap::new(),
            1,
        );
        let mut forest = Forest::new();
        builder.build_country_region_tree(country, None, &Plain, &mut forest);

        assert_eq!(forest.len(), 3);
        let root = forest.roots()[0];
        assert_eq!(forest.get(root).name(), "Country");
        let state_node = forest.children(root)[0];
        assert_eq!(forest.get(state_node).name(), "State");
        let city_node = forest.children(state_node)[0];
        assert_eq!(forest.get(city_node).name(), "City");
    }

    #[test]
    fn sovereign_codes() {
        assert_eq!(sovereign_country_code("PR"), "US");
        assert_eq!(sovereign_country_code("GF"), "FR");
        assert_eq!(sovereign_country_code("HK"), "CN");
        assert_eq!(sovereign_country_code("DE"), "DE");
    }
}
