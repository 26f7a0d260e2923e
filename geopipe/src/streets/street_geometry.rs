use crate::feature::GeoObjectId;
use geo::{BoundingRect, Centroid, Coord, LineString, MultiPolygon, Rect};

/// A chosen representative point of a street, with the id that owns it.
#[derive(Debug, Clone, Copy)]
pub struct Pin {
    pub position: Coord<f64>,
    pub id: GeoObjectId,
}

/// Accumulated geometry of one logical street: an optional explicit pin
/// (from a labelled point), line segments, polygonal areas and bound
/// address points.
#[derive(Debug, Clone, Default)]
pub struct StreetGeometry {
    pin: Option<Pin>,
    lines: Vec<(GeoObjectId, LineString<f64>)>,
    areas: Vec<(GeoObjectId, MultiPolygon<f64>)>,
    bindings: Vec<Pin>,
}

impl StreetGeometry {
    pub fn add_highway_line(&mut self, id: GeoObjectId, path: LineString<f64>) {
        self.lines.push((id, path));
    }

    pub fn add_highway_area(&mut self, id: GeoObjectId, area: MultiPolygon<f64>) {
        self.areas.push((id, area));
    }

    pub fn set_pin(&mut self, pin: Pin) {
        self.pin = Some(pin);
    }

    pub fn add_binding(&mut self, id: GeoObjectId, position: Coord<f64>) {
        self.bindings.push(Pin { position, id });
    }

    pub fn pin(&self) -> Option<&Pin> {
        self.pin.as_ref()
    }

    pub fn lines(&self) -> &[(GeoObjectId, LineString<f64>)] {
        &self.lines
    }

    pub fn areas(&self) -> &[(GeoObjectId, MultiPolygon<f64>)] {
        &self.areas
    }

    pub fn is_empty(&self) -> bool {
        self.pin.is_none() && self.lines.is_empty() && self.areas.is_empty() && self.bindings.is_empty()
    }

    /// The explicit pin, else the middle vertex of the first line, an area
    /// centroid, or the first bound address point.
    pub fn get_or_choose_pin(&self) -> Pin {
        if let Some(pin) = self.pin {
            return pin;
        }
        if let Some((id, line)) = self.lines.first() {
            return Pin {
                position: line.0[line.0.len() / 2],
                id: *id,
            };
        }
        if let Some((id, area)) = self.areas.first() {
            let position = area
                .centroid()
                .map(|c| c.0)
                .unwrap_or_else(|| area.0[0].exterior().0[0]);
            return Pin { position, id: *id };
        }
        self.bindings[0]
    }

    pub fn bbox(&self) -> Option<Rect<f64>> {
        let mut bbox: Option<Rect<f64>> = None;
        let mut extend = |other: Option<Rect<f64>>| {
            if let Some(other) = other {
                bbox = Some(match bbox {
                    None => other,
                    Some(current) => Rect::new(
                        Coord {
                            x: current.min().x.min(other.min().x),
                            y: current.min().y.min(other.min().y),
                        },
                        Coord {
                            x: current.max().x.max(other.max().x),
                            y: current.max().y.max(other.max().y),
                        },
                    ),
                });
            }
        };

        for (_, line) in &self.lines {
            extend(line.bounding_rect());
        }
        for (_, area) in &self.areas {
            extend(area.bounding_rect());
        }
        if let Some(pin) = &self.pin {
            extend(Some(Rect::new(pin.position, pin.position)));
        }
        for binding in &self.bindings {
            extend(Some(Rect::new(binding.position, binding.position)));
        }
        bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::GeoObjectKind;

    #[test]
    fn pin_choice_prefers_explicit_pin() {
        let mut geometry = StreetGeometry::default();
        geometry.add_highway_line(
            GeoObjectId::new(GeoObjectKind::OsmWay, 1),
            LineString::from(vec![(0.0, 0.0), (2.0, 0.0), (4.0, 0.0)]),
        );
        assert_eq!(geometry.get_or_choose_pin().position, Coord { x: 2.0, y: 0.0 });

        geometry.set_pin(Pin {
            position: Coord { x: 9.0, y: 9.0 },
            id: GeoObjectId::new(GeoObjectKind::OsmNode, 2),
        });
        assert_eq!(geometry.get_or_choose_pin().position, Coord { x: 9.0, y: 9.0 });
    }

    #[test]
    fn bbox_spans_all_parts() {
        let mut geometry = StreetGeometry::default();
        geometry.add_highway_line(
            GeoObjectId::new(GeoObjectKind::OsmWay, 1),
            LineString::from(vec![(0.0, 0.0), (4.0, 1.0)]),
        );
        geometry.add_binding(
            GeoObjectId::new(GeoObjectKind::Surrogate, 1),
            Coord { x: -2.0, y: 5.0 },
        );
        let bbox = geometry.bbox().unwrap();
        assert_eq!(bbox.min(), Coord { x: -2.0, y: 0.0 });
        assert_eq!(bbox.max(), Coord { x: 4.0, y: 5.0 });
    }
}
