use crate::model::{EntityKind, Member, OsmElement};
use crate::OsmError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;
use std::path::Path;

/// Streams an OSM XML dump. Only the four element tags and their `tag`,
/// `nd` and `member` children are interpreted; everything else (bounds,
/// changesets, notes) is skipped.
pub fn for_each<F>(path: &Path, mut processor: F) -> Result<(), OsmError>
where
    F: FnMut(OsmElement),
{
    log::info!("reading OSM data from {}", path.display());
    let reader = Reader::from_file(path).map_err(|e| OsmError::SourceRead {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    from_reader(reader, path, &mut processor)
}

fn from_reader<R: BufRead, F>(
    mut reader: Reader<R>,
    path: &Path,
    processor: &mut F,
) -> Result<(), OsmError>
where
    F: FnMut(OsmElement),
{
    reader.config_mut().trim_text(true);

    let mut buffer = Vec::new();
    let mut current: Option<OsmElement> = None;

    loop {
        let event = reader.read_event_into(&mut buffer).map_err(|e| OsmError::SourceRead {
            path: path.display().to_string(),
            message: format!("xml error at byte {}: {e}", reader.buffer_position()),
        })?;

        match event {
            Event::Start(ref start) => {
                if let Some(element) = open_element(start, path)? {
                    current = Some(element);
                } else {
                    fill_child(start, current.as_mut(), path)?;
                }
            }
            Event::Empty(ref start) => {
                if let Some(element) = open_element(start, path)? {
                    // Self-closed node/way/relation: complete as-is.
                    processor(element);
                } else {
                    fill_child(start, current.as_mut(), path)?;
                }
            }
            Event::End(ref end) => {
                if matches!(end.name().as_ref(), b"node" | b"way" | b"relation") {
                    if let Some(element) = current.take() {
                        processor(element);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buffer.clear();
    }
    Ok(())
}

fn open_element(start: &BytesStart<'_>, path: &Path) -> Result<Option<OsmElement>, OsmError> {
    let kind = match start.name().as_ref() {
        b"node" => EntityKind::Node,
        b"way" => EntityKind::Way,
        b"relation" => EntityKind::Relation,
        _ => return Ok(None),
    };

    let mut element = OsmElement {
        kind,
        ..OsmElement::default()
    };
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| bad_xml(path, e.to_string()))?;
        let value = attribute
            .unescape_value()
            .map_err(|e| bad_xml(path, e.to_string()))?;
        match attribute.key.as_ref() {
            b"id" => element.id = parse_number(&value, path)?,
            b"lat" => element.lat = parse_float(&value, path)?,
            b"lon" => element.lon = parse_float(&value, path)?,
            _ => {}
        }
    }
    Ok(Some(element))
}

fn fill_child(
    start: &BytesStart<'_>,
    current: Option<&mut OsmElement>,
    path: &Path,
) -> Result<(), OsmError> {
    let Some(element) = current else {
        return Ok(());
    };

    match start.name().as_ref() {
        b"tag" => {
            let mut key = None;
            let mut value = None;
            for attribute in start.attributes() {
                let attribute = attribute.map_err(|e| bad_xml(path, e.to_string()))?;
                let text = attribute
                    .unescape_value()
                    .map_err(|e| bad_xml(path, e.to_string()))?
                    .into_owned();
                match attribute.key.as_ref() {
                    b"k" => key = Some(text),
                    b"v" => value = Some(text),
                    _ => {}
                }
            }
            if let (Some(key), Some(value)) = (key, value) {
                element.add_tag(key, value);
            }
        }
        b"nd" => {
            for attribute in start.attributes() {
                let attribute = attribute.map_err(|e| bad_xml(path, e.to_string()))?;
                if attribute.key.as_ref() == b"ref" {
                    let value = attribute
                        .unescape_value()
                        .map_err(|e| bad_xml(path, e.to_string()))?;
                    element.node_refs.push(parse_number(&value, path)?);
                }
            }
        }
        b"member" => {
            let mut member = Member {
                reference: 0,
                kind: EntityKind::Unknown,
                role: String::new(),
            };
            for attribute in start.attributes() {
                let attribute = attribute.map_err(|e| bad_xml(path, e.to_string()))?;
                let value = attribute
                    .unescape_value()
                    .map_err(|e| bad_xml(path, e.to_string()))?;
                match attribute.key.as_ref() {
                    b"ref" => member.reference = parse_number(&value, path)?,
                    b"type" => {
                        member.kind = match value.as_ref() {
                            "node" => EntityKind::Node,
                            "way" => EntityKind::Way,
                            "relation" => EntityKind::Relation,
                            _ => EntityKind::Unknown,
                        }
                    }
                    b"role" => member.role = value.into_owned(),
                    _ => {}
                }
            }
            element.members.push(member);
        }
        _ => {}
    }
    Ok(())
}

fn parse_number(text: &str, path: &Path) -> Result<u64, OsmError> {
    text.parse()
        .map_err(|e| bad_xml(path, format!("bad id '{text}': {e}")))
}

fn parse_float(text: &str, path: &Path) -> Result<f64, OsmError> {
    text.parse()
        .map_err(|e| bad_xml(path, format!("bad coordinate '{text}': {e}")))
}

fn bad_xml(path: &Path, message: String) -> OsmError {
    OsmError::SourceRead {
        path: path.display().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <bounds minlat="51.5" minlon="-0.2" maxlat="51.6" maxlon="-0.1"/>
  <node id="1" lat="51.51" lon="-0.11">
    <tag k="place" v="city"/>
    <tag k="name" v="London"/>
  </node>
  <node id="2" lat="51.515" lon="-0.115"/>
  <way id="273127">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
    <tag k="name" v="Arbat Street"/>
  </way>
  <relation id="273177">
    <member type="way" ref="273127" role="outer"/>
    <member type="node" ref="1" role="admin_centre"/>
    <tag k="type" v="multipolygon"/>
  </relation>
</osm>
"#;

    fn read_sample() -> Vec<OsmElement> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planet.xml");
        std::fs::write(&path, SAMPLE).unwrap();
        let mut elements = Vec::new();
        for_each(&path, |e| elements.push(e)).unwrap();
        elements
    }

    #[test]
    fn parses_nodes_ways_relations() {
        let elements = read_sample();
        assert_eq!(elements.len(), 4);

        let city = &elements[0];
        assert!(city.is_node());
        assert_eq!(city.id, 1);
        assert!((city.lat - 51.51).abs() < 1e-9);
        assert_eq!(city.tag("name"), Some("London"));

        let way = &elements[2];
        assert!(way.is_way());
        assert_eq!(way.node_refs, vec![1, 2]);
        assert_eq!(way.tag("highway"), Some("residential"));

        let relation = &elements[3];
        assert!(relation.is_relation());
        assert_eq!(relation.members.len(), 2);
        assert_eq!(relation.members[0].kind, EntityKind::Way);
        assert_eq!(relation.members[0].role, "outer");
        assert_eq!(relation.tag("type"), Some("multipolygon"));
    }

    #[test]
    fn self_closed_node_is_emitted() {
        let elements = read_sample();
        assert_eq!(elements[1].id, 2);
        assert!(elements[1].tags.is_empty());
    }
}
