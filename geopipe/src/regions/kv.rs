use super::builder::RegionsBuilder;
use super::tree::{Forest, NodeId};
use crate::GeneratorError;
use geopipe_core::kv::serialize_id;
use geopipe_core::mercator;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Serializes every placed region of every country as one KV line:
/// `<16-hex-id> <geojson>` with rank, dref and per-locale nested addresses.
pub fn save_regions_kv(builder: RegionsBuilder, path: &Path) -> Result<(), GeneratorError> {
    let file = File::create(path).map_err(GeneratorError::io(path.display().to_string()))?;
    let mut out = BufWriter::new(file);
    let mut total = 0usize;

    let mut write_error = None;
    builder.for_each_country(|name, forest| {
        let mut count = 0usize;
        forest.for_each(|node| {
            if write_error.is_some() {
                return;
            }
            let line = region_kv_line(&forest, node);
            if let Err(e) = out.write_all(line.as_bytes()) {
                write_error = Some(GeneratorError::io(path.display().to_string())(e));
                return;
            }
            count += 1;
        });
        log::info!("country {name}: {count} region entries");
        total += count;
    });
    if let Some(e) = write_error {
        return Err(e);
    }

    out.flush()
        .map_err(GeneratorError::io(path.display().to_string()))?;
    log::info!("regions key-value storage: {total} entries");
    Ok(())
}

fn region_kv_line(forest: &Forest, node: NodeId) -> String {
    let data = forest.get(node);
    let (lat, lon) = mercator::to_lat_lon(data.center());

    let mut chain = vec![node];
    chain.extend(forest.ancestors(node));

    // Every locale any link of the chain is named in gets an address block;
    // untranslated levels fall back to the default name.
    let mut locales_present = BTreeSet::from(["default".to_string()]);
    for &link in &chain {
        for (locale, _) in forest.get(link).names().iter() {
            locales_present.insert(locale.to_string());
        }
    }

    let mut locales = Map::new();
    for locale in &locales_present {
        let mut address = Map::new();
        for &link in &chain {
            let link_data = forest.get(link);
            let Some(field) = link_data.level.address_field() else {
                continue;
            };
            let name = link_data
                .names()
                .get(locale)
                .or_else(|| link_data.names().default_name());
            if let Some(name) = name {
                // The nearest link wins when levels repeat along the chain.
                address.entry(field).or_insert_with(|| json!(name));
            }
        }

        let name = data
            .names()
            .get(locale)
            .or_else(|| data.names().default_name())
            .unwrap_or_default();
        locales.insert(
            locale.clone(),
            json!({ "name": name, "address": Value::Object(address) }),
        );
    }

    let mut properties = Map::new();
    properties.insert("kind".into(), json!(data.kind_string()));
    properties.insert("rank".into(), json!(data.level.rank()));
    properties.insert("locales".into(), Value::Object(locales));
    if let Some(parent) = forest.parent(node) {
        properties.insert(
            "dref".into(),
            json!(serialize_id(forest.get(parent).id().encoded())),
        );
    }

    let value = json!({
        "type": "Feature",
        "geometry": { "type": "Point", "coordinates": [lon, lat] },
        "properties": Value::Object(properties),
    });

    format!("{} {}\n", serialize_id(data.id().encoded()), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::place::PlaceLevel;
    use crate::regions::region::test_support::rect_region;
    use crate::regions::tree::LevelRegion;

    #[test]
    fn kv_line_carries_rank_dref_and_address() {
        let mut forest = Forest::new();
        let country = forest.add_root(LevelRegion::from_region(
            PlaceLevel::Country,
            rect_region(1, "Cuba", (0.0, 0.0), (100.0, 100.0)),
        ));
        let region = forest.add_node(LevelRegion::from_region(
            PlaceLevel::Region,
            rect_region(2, "Ciego de Ávila", (10.0, 10.0), (50.0, 50.0)),
        ));
        forest.set_parent(region, country);

        let line = region_kv_line(&forest, region);
        let (id, json) = line.trim_end().split_once(' ').unwrap();
        assert_eq!(id.len(), 16);

        let value: Value = serde_json::from_str(json).unwrap();
        let properties = &value["properties"];
        assert_eq!(properties["rank"], 2);
        assert_eq!(
            properties["dref"],
            serialize_id(forest.get(country).id().encoded())
        );
        let address = &properties["locales"]["default"]["address"];
        assert_eq!(address["country"], "Cuba");
        assert_eq!(address["region"], "Ciego de Ávila");
    }
}
