use crate::beam::Beam;
use crate::hierarchy::{Entry, Hierarchy};
use crate::hierarchy_reader::HierarchyReader;
use crate::house_numbers::{
    house_number_tokens, looks_like_house_number, match_house_numbers,
};
use crate::index::{DocId, Index};
use crate::name_dictionary::{MultipleNames, NameDictionary, UNSPECIFIED_POSITION};
use crate::tokenize::{is_ascii_numeric, tokenize};
use crate::types::{Kind, Tokens, Type, INDEX_FORMAT_VERSION, TYPE_COUNT};
use crate::GeocoderError;
use geopipe_core::coding::{
    read_string, read_u32, read_u64, read_u8, read_varuint, write_string, write_u32, write_u64,
    write_u8, write_varuint,
};
use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MAX_RESULTS: usize = 100;

/// Certainty is a log-prob style measure of belief that the token labelling
/// is right: heavier levels shadow lighter ones, so a correct city with a
/// wrong street outranks a lone correct street in a wrong city.
fn type_weight(level: Type) -> f64 {
    match level {
        Type::Country => 10.0,
        Type::Region => 4.0,
        Type::Subregion => 4.0,
        Type::Locality => 5.0,
        Type::Suburb => 1.0,
        Type::Sublocality => 1.0,
        Type::Street => 2.0,
        Type::Building => 0.1,
    }
}

/// Kind refinements let a city outrank a town and a town outrank a hamlet
/// sharing the same name.
fn kind_weight(kind: Kind) -> Option<f64> {
    match kind {
        Kind::Country => Some(10.0),
        Kind::State => Some(4.05),
        Kind::Province => Some(4.04),
        Kind::Municipality => Some(4.03),
        Kind::County => Some(4.02),
        Kind::District => Some(4.01),
        Kind::City => Some(5.05),
        Kind::Town => Some(5.04),
        Kind::Village => Some(5.02),
        Kind::Hamlet => Some(1.06),
        Kind::IsolatedDwelling => Some(1.02),
        Kind::Street => Some(2.0),
        Kind::Building => Some(0.1),
        Kind::Suburb | Kind::Quarter | Kind::Neighbourhood | Kind::Unknown => None,
    }
}

fn entry_weight(entry: &Entry) -> f64 {
    kind_weight(entry.kind).unwrap_or_else(|| type_weight(entry.entry_type))
}

/// Prefer city-states (Moscow, Istanbul) over same-named ordinary cities.
/// The bonus must stay below the building weight.
const CITY_STATE_EXTRA_WEIGHT: f64 = 0.05;

/// House-number fuzziness: an extra token on the candidate side is cheap, a
/// query token the candidate lacks costs four times as much.
const HOUSE_NUMBER_EXTRA_TOKEN_PENALTY: f64 = 0.02;
const HOUSE_NUMBER_MISSING_TOKEN_PENALTY: f64 = 4.0 * HOUSE_NUMBER_EXTRA_TOKEN_PENALTY;

/// Ceiling for results whose best entry only resembles the asked house
/// number.
const OTHER_SIMILAR_TOP_CERTAINTY: f64 = 0.95;

const STREET_SYNONYMS: [&str; 28] = [
    "street", "st", "avenue", "ave", "av", "road", "rd", "lane", "ln", "boulevard", "blvd",
    "drive", "dr", "square", "sq", "улица", "ул", "проспект", "просп", "пр", "переулок", "пер",
    "площадь", "пл", "шоссе", "ш", "бульвар", "наб",
];

fn is_street_synonym(token: &str) -> bool {
    STREET_SYNONYMS.contains(&token)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub osm_id: u64,
    pub certainty: f64,
}

#[derive(Debug, Clone)]
struct BeamKey {
    osm_id: u64,
    entry_type: Type,
    token_positions: Vec<usize>,
    all_types: Vec<Type>,
    is_other_similar: bool,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    doc: DocId,
    total_certainty: f64,
    is_other_similar: bool,
}

/// All entries matched by one subquery of consecutive tokens.
struct Layer {
    layer_type: Type,
    candidates: Vec<Candidate>,
}

struct Context {
    tokens: Tokens,
    token_types: Vec<Option<Type>>,
    num_used_tokens: usize,
    house_number_positions: BTreeSet<usize>,
    beam: Beam<BeamKey>,
    layers: Vec<Layer>,
}

impl Context {
    fn new(query: &str) -> Context {
        let tokens = tokenize(query);
        let token_types = vec![None; tokens.len()];
        Context {
            tokens,
            token_types,
            num_used_tokens: 0,
            house_number_positions: BTreeSet::new(),
            beam: Beam::new(MAX_RESULTS),
            layers: Vec::new(),
        }
    }

    fn mark_token(&mut self, position: usize, level: Option<Type>) {
        let was_used = self.token_types[position].is_some();
        self.token_types[position] = level;
        let now_used = level.is_some();
        if was_used && !now_used {
            self.num_used_tokens -= 1;
        }
        if !was_used && now_used {
            self.num_used_tokens += 1;
        }
    }

    fn is_token_used(&self, position: usize) -> bool {
        self.token_types[position].is_some()
    }

    fn all_tokens_used(&self) -> bool {
        self.num_used_tokens == self.tokens.len()
    }

    fn mark_house_number_positions(&mut self, positions: &[usize]) {
        self.house_number_positions.extend(positions.iter().copied());
    }

    fn assigned_tokens(&self) -> (Vec<usize>, Vec<Type>) {
        let mut positions = Vec::new();
        let mut all_types = Vec::new();
        for (i, level) in self.token_types.iter().enumerate() {
            if let Some(level) = level {
                positions.push(i);
                all_types.push(*level);
            }
        }
        all_types.sort_unstable();
        all_types.dedup();
        (positions, all_types)
    }

    fn fill_results(&self) -> Vec<SearchResult> {
        let mut results: Vec<(&BeamKey, f64)> = Vec::new();
        let mut seen = HashSet::new();
        let has_potential_house_number = !self.house_number_positions.is_empty();

        for (key, certainty) in self.beam.entries() {
            if !seen.insert(key.osm_id) {
                continue;
            }
            if has_potential_house_number && !self.is_good_for_potential_house_number(key) {
                continue;
            }
            results.push((key, *certainty));
        }

        let Some(&(best_key, best_certainty)) = results.first() else {
            return Vec::new();
        };
        let top = if best_key.is_other_similar {
            OTHER_SIMILAR_TOP_CERTAINTY
        } else {
            1.0
        };
        results
            .into_iter()
            .map(|(key, certainty)| SearchResult {
                osm_id: key.osm_id,
                certainty: certainty / best_certainty * top,
            })
            .collect()
    }

    /// Once any part of the query was seen as a house number, only emit
    /// buildings with a full address chain, labellings that consumed the
    /// whole query, or locality-anchored labellings covering every
    /// house-number token.
    fn is_good_for_potential_house_number(&self, key: &BeamKey) -> bool {
        if key.token_positions.len() == self.tokens.len() {
            return true;
        }
        if self.is_building_with_address(key) {
            return true;
        }
        if Self::has_locality_or_region(key) && self.contains_house_number_tokens(key) {
            return true;
        }
        false
    }

    fn is_building_with_address(&self, key: &BeamKey) -> bool {
        if key.entry_type != Type::Building {
            return false;
        }
        let mut got_locality = false;
        let mut got_street = false;
        let mut got_building = false;
        for level in &key.all_types {
            match level {
                Type::Region | Type::Subregion | Type::Locality => got_locality = true,
                Type::Street => got_street = true,
                Type::Building => got_building = true,
                _ => {}
            }
        }
        got_locality && got_street && got_building
    }

    fn has_locality_or_region(key: &BeamKey) -> bool {
        key.all_types
            .iter()
            .any(|t| matches!(t, Type::Region | Type::Subregion | Type::Locality))
    }

    fn contains_house_number_tokens(&self, key: &BeamKey) -> bool {
        self.house_number_positions
            .iter()
            .all(|position| key.token_positions.binary_search(position).is_ok())
    }
}

/// Server-side forward geocoder: returns the object ids whose hierarchical
/// addresses best match a free-text query. The only data source is the
/// nested-address hierarchy produced by the generator pipeline.
#[derive(Default)]
pub struct Geocoder {
    hierarchy: Hierarchy,
    index: Index,
}

impl Geocoder {
    pub fn new() -> Geocoder {
        Geocoder::default()
    }

    pub fn load_from_jsonl(
        &mut self,
        path: &Path,
        data_version_headline: bool,
        load_threads_count: usize,
    ) -> Result<(), GeocoderError> {
        let reader = HierarchyReader::open(path, data_version_headline)?;
        let (hierarchy, _stats) = reader.read(load_threads_count)?;
        self.hierarchy = hierarchy;
        self.index = Index::build(&self.hierarchy);
        Ok(())
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn process_query(&self, query: &str) -> Vec<SearchResult> {
        let started = std::time::Instant::now();
        let mut ctx = Context::new(query);
        self.go(&mut ctx, Type::Country);
        let results = ctx.fill_results();
        log::debug!("total geocoding time: {:?}", started.elapsed());
        results
    }

    /// One level of the beam search: try every contiguous run of unassigned
    /// tokens as a name of `level`, then recurse to the next level both with
    /// and without a match.
    fn go(&self, ctx: &mut Context, level: Type) {
        if ctx.tokens.is_empty() || ctx.all_tokens_used() {
            return;
        }

        let token_count = ctx.tokens.len();
        for i in 0..token_count {
            let mut subquery = Tokens::new();
            let mut subquery_positions = Vec::new();
            for j in i..token_count {
                if ctx.is_token_used(j) {
                    break;
                }
                subquery.push(ctx.tokens[j].clone());
                subquery_positions.push(j);

                // Buildings are indexed separately.
                let candidates = if level == Type::Building {
                    self.fill_buildings_layer(ctx, &subquery, &subquery_positions)
                } else {
                    self.fill_regular_layer(ctx, level, &subquery)
                };
                if candidates.is_empty() {
                    continue;
                }

                for position in i..=j {
                    ctx.mark_token(position, Some(level));
                }
                let synonym_mark = if level == Type::Street {
                    self.mark_street_synonym(ctx)
                } else {
                    None
                };

                self.add_results(ctx, &candidates);
                ctx.layers.push(Layer {
                    layer_type: level,
                    candidates,
                });
                if let Some(next) = level.next() {
                    self.go(ctx, next);
                }
                ctx.layers.pop();

                if let Some(position) = synonym_mark {
                    ctx.mark_token(position, None);
                }
                for position in i..=j {
                    ctx.mark_token(position, None);
                }
            }
        }

        if let Some(next) = level.next() {
            self.go(ctx, next);
        }
    }

    /// Street designator tokens ("ул", "st") are consumed for free while a
    /// street layer is active.
    fn mark_street_synonym(&self, ctx: &mut Context) -> Option<usize> {
        let position = (0..ctx.tokens.len())
            .find(|&i| !ctx.is_token_used(i) && is_street_synonym(&ctx.tokens[i]))?;
        ctx.mark_token(position, Some(Type::Street));
        Some(position)
    }

    fn fill_regular_layer(&self, ctx: &Context, level: Type, subquery: &Tokens) -> Vec<Candidate> {
        let entries = self.hierarchy.entries();
        let mut candidates = Vec::new();

        self.index.for_each_doc_id(subquery, |doc| {
            let entry = &entries[doc as usize];
            if entry.entry_type != level {
                return;
            }

            let parent_certainty = match ctx.layers.last() {
                None => 0.0,
                Some(layer) => {
                    match self.max_certainty_in_parent_candidates(layer, entry) {
                        Some(certainty) => certainty,
                        None => return,
                    }
                }
            };

            if level > Type::Locality && !self.is_relevant_locality_member(ctx, entry, subquery) {
                return;
            }

            let mut total = parent_certainty + entry_weight(entry) * subquery.len() as f64;
            if entry.entry_type == Type::Locality && self.in_city_state(entry) {
                total += CITY_STATE_EXTRA_WEIGHT;
            }
            candidates.push(Candidate {
                doc,
                total_certainty: total,
                is_other_similar: false,
            });
        });

        candidates
    }

    fn fill_buildings_layer(
        &self,
        ctx: &mut Context,
        subquery: &Tokens,
        subquery_positions: &[usize],
    ) -> Vec<Candidate> {
        let target = ctx
            .layers
            .iter()
            .rposition(|layer| matches!(layer.layer_type, Type::Street | Type::Locality));
        let Some(target) = target else {
            return Vec::new();
        };

        let joined = subquery.join(" ");
        if !looks_like_house_number(&joined) {
            return Vec::new();
        }
        // An unassigned continuation token means this run is a prefix of the
        // real house number; the longer run will be tried instead.
        if let Some(&last) = subquery_positions.last() {
            let next = last + 1;
            if next < ctx.tokens.len() && !ctx.is_token_used(next) {
                let extended = format!("{joined} {}", ctx.tokens[next]);
                if looks_like_house_number(&extended) {
                    return Vec::new();
                }
            }
        }

        // It may still be a zip code, but stay on the safe side and treat
        // the tokens as a potential house number for result filtering.
        ctx.mark_house_number_positions(subquery_positions);

        let query_hn = house_number_tokens(&joined);
        let dictionary = self.hierarchy.dictionary();
        let entries = self.hierarchy.entries();
        let layer = &ctx.layers[target];

        let mut candidates = Vec::new();
        for candidate in &layer.candidates {
            self.index.for_each_related_building(candidate.doc, |building_doc| {
                let building = &entries[building_doc as usize];
                let house = building
                    .normalized_names(Type::Building, dictionary)
                    .main_name();
                let house_tokens = house_number_tokens(house);
                let matched = match_house_numbers(&query_hn, &house_tokens);
                if !matched.is_one_sided() {
                    return;
                }
                let penalty = HOUSE_NUMBER_MISSING_TOKEN_PENALTY
                    * matched.query_mismatched_tokens_count as f64
                    + HOUSE_NUMBER_EXTRA_TOKEN_PENALTY
                        * matched.house_number_mismatched_tokens_count as f64;
                candidates.push(Candidate {
                    doc: building_doc,
                    total_certainty: candidate.total_certainty + entry_weight(building) - penalty,
                    is_other_similar: matched.query_mismatched_tokens_count > 0,
                });
            });
        }
        candidates
    }

    fn add_results(&self, ctx: &mut Context, candidates: &[Candidate]) {
        let (token_positions, all_types) = ctx.assigned_tokens();
        let entries = self.hierarchy.entries();
        for candidate in candidates {
            let entry = &entries[candidate.doc as usize];
            ctx.beam.add(
                BeamKey {
                    osm_id: entry.osm_id,
                    entry_type: entry.entry_type,
                    token_positions: token_positions.clone(),
                    all_types: all_types.clone(),
                    is_other_similar: candidate.is_other_similar,
                },
                candidate.total_certainty,
            );
        }
    }

    /// Best certainty among the previous layer's candidates that are
    /// parents of `entry`; None when the layer holds no parent.
    fn max_certainty_in_parent_candidates(&self, layer: &Layer, entry: &Entry) -> Option<f64> {
        let entries = self.hierarchy.entries();
        let mut best: Option<f64> = None;
        for candidate in &layer.candidates {
            let candidate_entry = &entries[candidate.doc as usize];
            if self.hierarchy.is_parent_to(candidate_entry, entry) {
                best = Some(match best {
                    None => candidate.total_certainty,
                    Some(current) => current.max(candidate.total_certainty),
                });
            }
        }
        best
    }

    /// A bare number below the locality level is only believable when some
    /// already-matched locality contains the entry.
    fn is_relevant_locality_member(&self, ctx: &Context, entry: &Entry, subquery: &Tokens) -> bool {
        let is_numeric = subquery.len() == 1 && is_ascii_numeric(&subquery[0]);
        !is_numeric || self.has_member_locality_in_matching(ctx, entry)
    }

    fn has_member_locality_in_matching(&self, ctx: &Context, entry: &Entry) -> bool {
        let entries = self.hierarchy.entries();
        for layer in &ctx.layers {
            if layer.layer_type > Type::Locality {
                break;
            }
            if layer.layer_type != Type::Locality {
                continue;
            }
            for candidate in &layer.candidates {
                let matched = &entries[candidate.doc as usize];
                if self.hierarchy.is_parent_to(matched, entry) {
                    return true;
                }
            }
        }
        false
    }

    /// A locality whose name equals its region's or subregion's name.
    fn in_city_state(&self, entry: &Entry) -> bool {
        if !entry.has_field_in_address(Type::Locality) {
            return false;
        }
        let dictionary = self.hierarchy.dictionary();
        let locality = entry
            .normalized_names(Type::Locality, dictionary)
            .main_name();
        for level in [Type::Region, Type::Subregion] {
            if !entry.has_field_in_address(level) {
                continue;
            }
            if entry.normalized_names(level, dictionary).main_name() == locality {
                return true;
            }
        }
        false
    }

    // Binary token index archive: a fixed-version little-endian dump of the
    // hierarchy, the name dictionary and the inverted index.

    pub fn save_to_binary_index(&self, path: &Path) -> Result<(), GeocoderError> {
        let file =
            File::create(path).map_err(|e| GeocoderError::Open(path.display().to_string(), e))?;
        let mut out = BufWriter::new(file);

        write_u32(&mut out, INDEX_FORMAT_VERSION)?;
        write_string(&mut out, self.hierarchy.data_version())?;

        let entries = self.hierarchy.entries();
        write_varuint(&mut out, entries.len() as u64)?;
        for entry in entries {
            write_u64(&mut out, entry.osm_id)?;
            write_string(&mut out, &entry.name)?;
            write_u8(&mut out, entry.entry_type as u8)?;
            write_u8(&mut out, entry.kind as u8)?;
            for position in entry.normalized_address {
                write_varuint(&mut out, u64::from(position))?;
            }
        }

        let dictionary = self.hierarchy.dictionary();
        write_varuint(&mut out, dictionary.len() as u64)?;
        for names in dictionary.iter() {
            write_varuint(&mut out, names.names().len() as u64)?;
            for name in names.iter() {
                write_string(&mut out, name)?;
            }
        }

        write_varuint(&mut out, self.index.docs_by_token.len() as u64)?;
        let mut tokens: Vec<&String> = self.index.docs_by_token.keys().collect();
        tokens.sort();
        for token in tokens {
            let docs = &self.index.docs_by_token[token];
            write_string(&mut out, token)?;
            write_varuint(&mut out, docs.len() as u64)?;
            for &doc in docs {
                write_varuint(&mut out, u64::from(doc))?;
            }
        }

        write_varuint(&mut out, self.index.related_buildings.len() as u64)?;
        let mut docs: Vec<&DocId> = self.index.related_buildings.keys().collect();
        docs.sort();
        for doc in docs {
            let buildings = &self.index.related_buildings[doc];
            write_varuint(&mut out, u64::from(*doc))?;
            write_varuint(&mut out, buildings.len() as u64)?;
            for &building in buildings {
                write_varuint(&mut out, u64::from(building))?;
            }
        }

        out.flush()
            .map_err(|e| GeocoderError::Open(path.display().to_string(), e))?;
        Ok(())
    }

    pub fn load_from_binary_index(&mut self, path: &Path) -> Result<(), GeocoderError> {
        let file =
            File::open(path).map_err(|e| GeocoderError::Open(path.display().to_string(), e))?;
        let mut source = BufReader::new(file);

        let version = read_u32(&mut source)?;
        if version != INDEX_FORMAT_VERSION {
            return Err(GeocoderError::IndexVersionMismatch {
                expected: INDEX_FORMAT_VERSION,
                actual: version,
            });
        }
        let data_version = read_string(&mut source)?;

        let entry_count = read_varuint(&mut source)? as usize;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let osm_id = read_u64(&mut source)?;
            let name = read_string(&mut source)?;
            let entry_type = Type::from_index(read_u8(&mut source)? as usize)
                .ok_or_else(|| GeocoderError::Load("bad entry type in archive".into()))?;
            let kind = Kind::from_index(read_u8(&mut source)?);
            let mut normalized_address = [UNSPECIFIED_POSITION; TYPE_COUNT];
            for position in &mut normalized_address {
                *position = read_varuint(&mut source)? as u32;
            }
            entries.push(Entry {
                osm_id,
                name,
                entry_type,
                kind,
                normalized_address,
            });
        }

        let mut dictionary = NameDictionary::default();
        let names_count = read_varuint(&mut source)? as usize;
        for _ in 0..names_count {
            let count = read_varuint(&mut source)? as usize;
            let mut names = MultipleNames::default();
            for i in 0..count {
                let name = read_string(&mut source)?;
                if i == 0 {
                    names.set_main_name(name);
                } else {
                    names.add_alt_name(name);
                }
            }
            dictionary.add(names);
        }

        let mut index = Index::default();
        let token_count = read_varuint(&mut source)? as usize;
        for _ in 0..token_count {
            let token = read_string(&mut source)?;
            let doc_count = read_varuint(&mut source)? as usize;
            let mut docs = Vec::with_capacity(doc_count);
            for _ in 0..doc_count {
                docs.push(read_varuint(&mut source)? as DocId);
            }
            index.docs_by_token.insert(token, docs);
        }
        let related_count = read_varuint(&mut source)? as usize;
        for _ in 0..related_count {
            let doc = read_varuint(&mut source)? as DocId;
            let building_count = read_varuint(&mut source)? as usize;
            let mut buildings = Vec::with_capacity(building_count);
            for _ in 0..building_count {
                buildings.push(read_varuint(&mut source)? as DocId);
            }
            index.related_buildings.insert(doc, buildings);
        }

        self.hierarchy = Hierarchy::new(entries, dictionary, data_version);
        self.index = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CERTAINTY_EPS: f64 = 1e-3;

    const REGIONS_DATA: &str = r#"C00000000004B279 {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-80.1142033187951, 21.55511095]}, "properties": {"kind": "country", "locales": {"default": {"name": "Cuba", "address": {"country": "Cuba"}}}, "rank": 2}}
C0000000001C4CA7 {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-78.7260117405499, 21.74300205]}, "properties": {"kind": "province", "locales": {"default": {"name": "Ciego de Ávila", "address": {"region": "Ciego de Ávila", "country": "Cuba"}}}, "rank": 4}}
C00000000059D6B5 {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-78.9263054493181, 22.08185765]}, "properties": {"kind": "district", "locales": {"default": {"name": "Florencia", "address": {"subregion": "Florencia", "region": "Ciego de Ávila", "country": "Cuba"}}}, "rank": 6}}
"#;

    fn load(data: &str) -> Geocoder {
        let reader = HierarchyReader::from_reader(Cursor::new(data), false).unwrap();
        let (hierarchy, _) = reader.read(1).unwrap();
        let index = Index::build(&hierarchy);
        Geocoder { hierarchy, index }
    }

    fn expect(geocoder: &Geocoder, query: &str, expected: &[(u64, f64)]) {
        let mut actual = geocoder.process_query(query);
        assert_eq!(actual.len(), expected.len(), "query '{query}': {actual:?}");
        actual.sort_by_key(|r| r.osm_id);
        let mut expected = expected.to_vec();
        expected.sort_by_key(|(id, _)| *id);
        for (result, (id, certainty)) in actual.iter().zip(expected.iter()) {
            assert!(
                result.certainty >= 0.0 && result.certainty <= 1.0,
                "query '{query}': certainty {} out of range",
                result.certainty
            );
            assert_eq!(result.osm_id, *id, "query '{query}'");
            assert!(
                (result.certainty - certainty).abs() < CERTAINTY_EPS,
                "query '{query}', id {id:X}: {} vs {certainty}",
                result.certainty
            );
        }
    }

    #[test]
    fn smoke() {
        let geocoder = load(REGIONS_DATA);
        let florencia = 0xC00000000059D6B5;
        let cuba = 0xC00000000004B279;

        expect(&geocoder, "florencia", &[(florencia, 1.0)]);
        expect(
            &geocoder,
            "cuba florencia",
            &[(florencia, 1.0), (cuba, 0.713776)],
        );
        expect(
            &geocoder,
            "florencia somewhere in cuba",
            &[(cuba, 0.713776), (florencia, 1.0)],
        );
    }

    #[test]
    fn hierarchy_addresses() {
        let geocoder = load(REGIONS_DATA);
        let dictionary = geocoder.hierarchy().dictionary();

        let mut entries = Vec::new();
        geocoder
            .index()
            .for_each_doc_id(&["florencia".to_string()], |doc| {
                entries.push(geocoder.hierarchy().entries()[doc as usize].clone());
            });
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(
            entry.normalized_names(Type::Country, dictionary).main_name(),
            "cuba"
        );
        assert_eq!(
            entry.normalized_names(Type::Region, dictionary).main_name(),
            "ciego de avila"
        );
        assert_eq!(
            entry.normalized_names(Type::Subregion, dictionary).main_name(),
            "florencia"
        );
    }

    #[test]
    fn parenting_is_antisymmetric() {
        let geocoder = load(REGIONS_DATA);
        let entries = geocoder.hierarchy().entries();
        for a in entries {
            for b in entries {
                if a.osm_id == b.osm_id {
                    continue;
                }
                let ab = geocoder.hierarchy().is_parent_to(a, b);
                let ba = geocoder.hierarchy().is_parent_to(b, a);
                assert!(!(ab && ba), "{:X} and {:X} parent each other", a.osm_id, b.osm_id);
            }
        }
    }

    #[test]
    fn english_names() {
        let data = r#"10 {"properties": {"kind": "city", "locales": {"default": {"address": {"locality": "Москва"}}, "en": {"address": {"locality": "Moscow"}}}}}
11 {"properties": {"kind": "street", "locales": {"default": {"address": {"locality": "Москва", "street": "улица Новый Арбат"}}, "en": {"address": {"locality": "Moscow", "street": "New Arbat Avenue"}}}}}
"#;
        let geocoder = load(data);
        expect(
            &geocoder,
            "Moscow, New Arbat",
            &[(0x11, 1.0), (0x10, 0.558011)],
        );
    }

    const ONLY_BUILDINGS_DATA: &str = r#"10 {"properties": {"kind": "city", "locales": {"default": {"address": {"locality": "Some Locality"}}}}}
21 {"properties": {"kind": "street", "locales": {"default": {"address": {"street": "Good", "locality": "Some Locality"}}}}}
22 {"properties": {"kind": "building", "locales": {"default": {"address": {"building": "5", "street": "Good", "locality": "Some Locality"}}}}}
31 {"properties": {"kind": "street", "locales": {"default": {"address": {"street": "Bad", "locality": "Some Locality"}}}}}
32 {"properties": {"kind": "building", "locales": {"default": {"address": {"building": "10", "street": "Bad", "locality": "Some Locality"}}}}}
40 {"properties": {"kind": "street", "locales": {"default": {"address": {"street": "MaybeNumbered", "locality": "Some Locality"}}}}}
41 {"properties": {"kind": "street", "locales": {"default": {"address": {"street": "MaybeNumbered-3", "locality": "Some Locality"}}}}}
42 {"properties": {"kind": "building", "locales": {"default": {"address": {"building": "3", "street": "MaybeNumbered", "locality": "Some Locality"}}}}}
"#;

    #[test]
    fn only_buildings() {
        let geocoder = load(ONLY_BUILDINGS_DATA);

        expect(&geocoder, "some locality", &[(0x10, 1.0)]);
        expect(
            &geocoder,
            "some locality good",
            &[(0x21, 1.0), (0x10, 0.834711)],
        );
        expect(
            &geocoder,
            "some locality bad",
            &[(0x31, 1.0), (0x10, 0.834711)],
        );

        expect(&geocoder, "some locality good 5", &[(0x22, 1.0)]);
        expect(&geocoder, "some locality bad 10", &[(0x32, 1.0)]);

        // There is a building "10" on Bad Street but the policy is an exact
        // match or no match at all.
        expect(&geocoder, "some locality good 10", &[]);

        // A non-building may still win when it consumes every query token.
        expect(
            &geocoder,
            "some locality maybenumbered 3",
            &[(0x41, 1.0), (0x42, 0.865248)],
        );
    }

    #[test]
    fn mismatched_locality() {
        let data = r#"10 {"properties": {"kind": "city", "locales": {"default": {"address": {"locality": "Moscow"}}}}}
11 {"properties": {"kind": "city", "locales": {"default": {"address": {"locality": "Paris"}}}}}
21 {"properties": {"kind": "street", "locales": {"default": {"address": {"street": "Krymskaya", "locality": "Moscow"}}}}}
22 {"properties": {"kind": "building", "locales": {"default": {"address": {"building": "2", "street": "Krymskaya", "locality": "Moscow"}}}}}
31 {"properties": {"kind": "street", "locales": {"default": {"address": {"street": "Krymskaya", "locality": "Paris"}}}}}
32 {"properties": {"kind": "building", "locales": {"default": {"address": {"building": "3", "street": "Krymskaya", "locality": "Paris"}}}}}
"#;
        let geocoder = load(data);
        expect(&geocoder, "Moscow Krymskaya 2", &[(0x22, 1.0)]);
        // "Krymskaya 3" almost matches Paris-Krymskaya-3, but not here.
        expect(&geocoder, "Moscow Krymskaya 3", &[]);
    }

    const ZORGE_DATA: &str = r#"10 {"properties": {"kind": "city", "locales": {"default": {"address": {"locality": "Москва"}}}}}
11 {"properties": {"kind": "street", "locales": {"default": {"address": {"street": "Зорге", "locality": "Москва"}}}}}
12 {"properties": {"kind": "building", "locales": {"default": {"address": {"building": "7", "street": "Зорге", "locality": "Москва"}}}}}
13 {"properties": {"kind": "building", "locales": {"default": {"address": {"building": "7 к2", "street": "Зорге", "locality": "Москва"}}}}}
14 {"properties": {"kind": "building", "locales": {"default": {"address": {"building": "7 к2 с3", "street": "Зорге", "locality": "Москва"}}}}}
"#;

    #[test]
    fn house_number_partial_match() {
        let geocoder = load(ZORGE_DATA);

        expect(
            &geocoder,
            "Москва, Зорге 7к2",
            &[(0x13, 1.0), (0x14, 0.994406), (0x12, 0.977622)],
        );
        expect(
            &geocoder,
            "Москва, Зорге 7 к2",
            &[(0x13, 1.0), (0x14, 0.994406), (0x12, 0.977622)],
        );
        expect(
            &geocoder,
            "Москва, Зорге 7",
            &[(0x12, 1.0), (0x13, 0.994406), (0x14, 0.988811)],
        );
        expect(&geocoder, "Москва, Зорге 7к1", &[(0x12, 0.95)]);
        expect(&geocoder, "Москва, Зорге 7A", &[(0x12, 0.95)]);
        expect(&geocoder, "Москва, Зорге 7 A", &[(0x12, 0.95)]);
    }

    #[test]
    fn moscow_locality_rank() {
        let data = r#"10 {"properties": {"kind": "state", "locales": {"default": {"address": {"region": "Москва"}}}, "rank": 2}}
11 {"properties": {"kind": "city", "locales": {"default": {"address": {"locality": "Москва", "region": "Москва"}}, "en": {"address": {"locality": "Moscow"}}}, "rank": 4}}
12 {"properties": {"kind": "street", "locales": {"default": {"address": {"street": "Ленинский проспект", "locality": "Москва", "region": "Москва"}}, "en": {"address": {"locality": "Moscow"}}}}}
20 {"properties": {"kind": "state", "locales": {"default": {"address": {"region": "Тверская Область"}}}, "rank": 2}}
21 {"properties": {"kind": "hamlet", "locales": {"default": {"address": {"locality": "Москва", "region": "Тверская Область"}}}, "rank": 4}}
22 {"properties": {"kind": "street", "locales": {"default": {"address": {"street": "Ленинский проспект", "locality": "Москва", "region": "Тверская Область"}}}}}
"#;
        let geocoder = load(data);

        // The city-state bonus puts the capital over the state and the
        // hamlet sharing its name.
        expect(
            &geocoder,
            "Москва",
            &[(0x11, 1.0), (0x21, 0.207843), (0x10, 0.794118)],
        );
        expect(
            &geocoder,
            "Москва, Ленинский проспект",
            &[
                (0x12, 1.0),
                (0x22, 0.556044),
                (0x11, 0.56044),
                (0x10, 0.445055),
                (0x21, 0.116484),
            ],
        );
    }

    #[test]
    fn street_with_number_in_city() {
        let data = r#"10 {"properties": {"kind": "city", "locales": {"default": {"address": {"locality": "Москва"}}}}}
11 {"properties": {"kind": "street", "locales": {"default": {"address": {"locality": "Москва", "street": "улица 1905 года"}}}}}
20 {"properties": {"kind": "town", "locales": {"default": {"address": {"locality": "Краснокамск"}}}}}
28 {"properties": {"kind": "street", "locales": {"default": {"address": {"locality": "Краснокамск", "street": "улица 1905 года"}}}}}
"#;
        let geocoder = load(data);
        expect(&geocoder, "Москва, улица 1905 года", &[(0x11, 1.0)]);
    }

    #[test]
    fn street_with_number_in_classified_city() {
        let data = r#"10 {"properties": {"kind": "city", "locales": {"default": {"address": {"locality": "Москва"}}}}}
11 {"properties": {"kind": "street", "locales": {"default": {"address": {"locality": "Москва", "street": "улица 1905 года"}}}}}
"#;
        let geocoder = load(data);
        expect(&geocoder, "город Москва, улица 1905 года", &[(0x11, 1.0)]);
    }

    #[test]
    fn binary_index_round_trip() {
        let geocoder = load(REGIONS_DATA);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoder.tokidx");
        geocoder.save_to_binary_index(&path).unwrap();

        let mut restored = Geocoder::new();
        restored.load_from_binary_index(&path).unwrap();
        expect(&restored, "florencia", &[(0xC00000000059D6B5, 1.0)]);
        expect(
            &restored,
            "cuba florencia",
            &[(0xC00000000059D6B5, 1.0), (0xC00000000004B279, 0.713776)],
        );
    }

    #[test]
    fn binary_index_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoder.tokidx");
        let mut bytes = Vec::new();
        write_u32(&mut bytes, INDEX_FORMAT_VERSION + 1).unwrap();
        std::fs::write(&path, &bytes).unwrap();

        let mut geocoder = Geocoder::new();
        let err = geocoder.load_from_binary_index(&path).unwrap_err();
        assert!(matches!(err, GeocoderError::IndexVersionMismatch { .. }));
    }
}
