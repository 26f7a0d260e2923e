use crate::name_dictionary::{
    MultipleNames, NameDictionary, NameDictionaryBuilder, Position, UNSPECIFIED_POSITION,
};
use crate::tokenize::normalize;
use crate::types::{Kind, Type, TYPE_COUNT};

/// Counters accumulated while building the hierarchy from a KV file; logged
/// once after the load.
#[derive(Debug, Default, Clone)]
pub struct ParsingStats {
    pub num_loaded: u64,
    pub bad_jsons: u64,
    pub bad_osm_ids: u64,
    pub duplicate_osm_ids: u64,
    pub duplicate_addresses: u64,
    pub empty_addresses: u64,
    pub empty_names: u64,
    pub no_locality_streets: u64,
    pub no_locality_buildings: u64,
    pub mismatched_names: u64,
}

impl ParsingStats {
    pub fn absorb(&mut self, other: &ParsingStats) {
        self.num_loaded += other.num_loaded;
        self.bad_jsons += other.bad_jsons;
        self.bad_osm_ids += other.bad_osm_ids;
        self.duplicate_osm_ids += other.duplicate_osm_ids;
        self.duplicate_addresses += other.duplicate_addresses;
        self.empty_addresses += other.empty_addresses;
        self.empty_names += other.empty_names;
        self.no_locality_streets += other.no_locality_streets;
        self.no_locality_buildings += other.no_locality_buildings;
        self.mismatched_names += other.mismatched_names;
    }
}

/// One row of the hierarchy: the address parts of a KV record, with every
/// field name replaced by its dictionary position.
#[derive(Debug, Clone)]
pub struct Entry {
    pub osm_id: u64,
    /// Original name, useful in logs.
    pub name: String,
    pub entry_type: Type,
    pub kind: Kind,
    pub normalized_address: [Position; TYPE_COUNT],
}

impl Entry {
    /// Parses the JSON part of one KV line. Returns None (with the matching
    /// stats counter bumped) for entries the geocoder cannot serve.
    pub fn from_json(
        osm_id: u64,
        json: &str,
        dictionary: &mut NameDictionaryBuilder,
        stats: &mut ParsingStats,
    ) -> Option<Entry> {
        let root: serde_json::Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("can't parse entry: {e} {json}");
                stats.bad_jsons += 1;
                return None;
            }
        };
        if !root.is_object() {
            stats.bad_jsons += 1;
            return None;
        }

        let properties = &root["properties"];
        let locales = &properties["locales"];
        if !locales.is_object() {
            stats.bad_jsons += 1;
            return None;
        }

        let mut normalized_address = [UNSPECIFIED_POSITION; TYPE_COUNT];
        let mut entry_type = None;
        for (i, level) in Type::ALL.iter().enumerate() {
            let Some(names) = fetch_address_field_names(locales, *level) else {
                continue;
            };
            normalized_address[i] = dictionary.add(names);
            entry_type = Some(*level);
        }

        let name = locales["default"]["name"].as_str().unwrap_or_default().to_string();
        if name.is_empty() {
            stats.empty_names += 1;
        }

        let Some(mut entry_type) = entry_type else {
            log::debug!("no address in a hierarchy entry: {json}");
            stats.empty_addresses += 1;
            return None;
        };

        // An explicit rank pins region entries to their level even when a
        // deeper address field is populated.
        if let Some(rank) = properties["rank"].as_u64() {
            if let Some(by_rank) = Type::from_rank(rank as u8) {
                if normalized_address[by_rank as usize] != UNSPECIFIED_POSITION {
                    entry_type = by_rank;
                }
            }
        }

        // Streets and buildings are unreachable without a locality or
        // subregion to anchor them.
        let has_anchor = normalized_address[Type::Locality as usize] != UNSPECIFIED_POSITION
            || normalized_address[Type::Subregion as usize] != UNSPECIFIED_POSITION;
        if entry_type == Type::Street && !has_anchor {
            stats.no_locality_streets += 1;
            return None;
        }
        if entry_type == Type::Building && !has_anchor {
            stats.no_locality_buildings += 1;
            return None;
        }

        let kind = Kind::from_str(properties["kind"].as_str().unwrap_or_default());

        Some(Entry {
            osm_id,
            name,
            entry_type,
            kind,
            normalized_address,
        })
    }

    pub fn has_field_in_address(&self, level: Type) -> bool {
        self.normalized_address[level as usize] != UNSPECIFIED_POSITION
    }

    pub fn normalized_names<'d>(
        &self,
        level: Type,
        dictionary: &'d NameDictionary,
    ) -> &'d MultipleNames {
        dictionary.get(self.normalized_address[level as usize])
    }
}

/// Collects the normalized names of one address level across locales; the
/// default locale supplies the main name, others accumulate as alternates.
fn fetch_address_field_names(locales: &serde_json::Value, level: Type) -> Option<MultipleNames> {
    let field = level.address_field();
    let mut names = MultipleNames::default();
    let mut has_main = false;

    for (locale, entry) in locales.as_object()? {
        let Some(value) = entry["address"][field].as_str() else {
            continue;
        };
        let normalized = normalize(value);
        if normalized.is_empty() {
            continue;
        }
        if locale == "default" {
            names.set_main_name(normalized);
            has_main = true;
        } else {
            names.add_alt_name(normalized);
        }
    }

    has_main.then_some(names)
}

/// The loaded hierarchy: entries sorted by id plus the shared dictionary.
#[derive(Default)]
pub struct Hierarchy {
    entries: Vec<Entry>,
    dictionary: NameDictionary,
    data_version: String,
}

impl Hierarchy {
    pub fn new(mut entries: Vec<Entry>, dictionary: NameDictionary, data_version: String) -> Hierarchy {
        if !entries.is_sorted_by_key(|e| e.osm_id) {
            log::info!("sorting entries...");
            entries.sort_by_key(|e| e.osm_id);
        }
        Hierarchy {
            entries,
            dictionary,
            data_version,
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn dictionary(&self) -> &NameDictionary {
        &self.dictionary
    }

    pub fn data_version(&self) -> &str {
        &self.data_version
    }

    pub fn entry_for_osm_id(&self, osm_id: u64) -> Option<&Entry> {
        let i = self.entries.partition_point(|e| e.osm_id < osm_id);
        self.entries.get(i).filter(|e| e.osm_id == osm_id)
    }

    /// `entry` is a parent of `to_entry` when every address level `entry`
    /// fills is filled identically (by main name) in `to_entry`. Ancestors
    /// are stored in the address, so the relation needs no child links.
    pub fn is_parent_to(&self, entry: &Entry, to_entry: &Entry) -> bool {
        for i in 0..TYPE_COUNT {
            let position = entry.normalized_address[i];
            if position == UNSPECIFIED_POSITION {
                continue;
            }
            let to_position = to_entry.normalized_address[i];
            if to_position == UNSPECIFIED_POSITION {
                return false;
            }
            if position == to_position {
                continue;
            }
            let name = self.dictionary.get(position).main_name();
            let to_name = self.dictionary.get(to_position).main_name();
            if name != to_name {
                return false;
            }
        }
        true
    }
}
