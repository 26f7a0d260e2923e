use crate::hierarchy::Hierarchy;
use crate::types::Type;
use std::collections::HashMap;

pub type DocId = u32;

/// Inverted token index over entry names plus the street/locality →
/// buildings relation. Immutable after build; lookups are lock-free.
#[derive(Default)]
pub struct Index {
    pub(crate) docs_by_token: HashMap<String, Vec<DocId>>,
    pub(crate) related_buildings: HashMap<DocId, Vec<DocId>>,
}

impl Index {
    /// Indexes every entry by the tokens of its own-level names, then links
    /// each building to the street and locality entries its address points
    /// back to.
    pub fn build(hierarchy: &Hierarchy) -> Index {
        let dictionary = hierarchy.dictionary();
        let mut docs_by_token: HashMap<String, Vec<DocId>> = HashMap::new();

        for (doc, entry) in hierarchy.entries().iter().enumerate() {
            let doc = doc as DocId;
            let names = entry.normalized_names(entry.entry_type, dictionary);
            for name in names.iter() {
                for token in name.split(' ') {
                    if token.is_empty() {
                        continue;
                    }
                    let docs = docs_by_token.entry(token.to_string()).or_default();
                    if docs.last() != Some(&doc) {
                        docs.push(doc);
                    }
                }
            }
        }
        for docs in docs_by_token.values_mut() {
            docs.sort_unstable();
            docs.dedup();
        }

        let mut index = Index {
            docs_by_token,
            related_buildings: HashMap::new(),
        };
        index.link_buildings(hierarchy);
        log::info!(
            "index: {} tokens, {} entries with related buildings",
            index.docs_by_token.len(),
            index.related_buildings.len()
        );
        index
    }

    fn link_buildings(&mut self, hierarchy: &Hierarchy) {
        let dictionary = hierarchy.dictionary();
        let entries = hierarchy.entries();
        let mut related: HashMap<DocId, Vec<DocId>> = HashMap::new();

        for (doc, building) in entries.iter().enumerate() {
            if building.entry_type != Type::Building {
                continue;
            }
            // A building is reachable through its street; only street-less
            // buildings fall back to their locality.
            let level = if building.has_field_in_address(Type::Street) {
                Type::Street
            } else if building.has_field_in_address(Type::Locality) {
                Type::Locality
            } else {
                continue;
            };
            let name = building.normalized_names(level, dictionary).main_name();
            let tokens: Vec<String> = name.split(' ').map(str::to_string).collect();
            self.for_each_doc_id(&tokens, |candidate| {
                let entry = &entries[candidate as usize];
                if entry.entry_type == level && hierarchy.is_parent_to(entry, building) {
                    related.entry(candidate).or_default().push(doc as DocId);
                }
            });
        }

        for docs in related.values_mut() {
            docs.sort_unstable();
            docs.dedup();
        }
        self.related_buildings = related;
    }

    /// Emits every doc whose indexed names contain all of `tokens`.
    pub fn for_each_doc_id<F: FnMut(DocId)>(&self, tokens: &[String], mut f: F) {
        let mut lists: Vec<&Vec<DocId>> = Vec::with_capacity(tokens.len());
        for token in tokens {
            match self.docs_by_token.get(token) {
                Some(list) => lists.push(list),
                None => return,
            }
        }
        if lists.is_empty() {
            return;
        }
        lists.sort_by_key(|list| list.len());

        let (first, rest) = lists.split_first().unwrap();
        'candidates: for &doc in first.iter() {
            for list in rest {
                if list.binary_search(&doc).is_err() {
                    continue 'candidates;
                }
            }
            f(doc);
        }
    }

    pub fn for_each_related_building<F: FnMut(DocId)>(&self, doc: DocId, mut f: F) {
        if let Some(buildings) = self.related_buildings.get(&doc) {
            for &building in buildings {
                f(building);
            }
        }
    }
}
