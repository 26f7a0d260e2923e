use super::geo_object_id::GeoObjectId;
use super::name_table::NameTable;
use geo::{BoundingRect, Centroid, Coord, LineString, MultiPolygon, Polygon, Rect};
use geopipe_core::coding::{
    read_string, read_u32, read_u64, read_u8, read_varuint, write_string, write_u32, write_u64,
    write_u8, write_varuint,
};
use geopipe_core::CoreError;
use std::io::{Read, Write};

/// Classified-type bitfield of a feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureTypes(u32);

impl FeatureTypes {
    pub const ADMIN_BOUNDARY: FeatureTypes = FeatureTypes(1);
    pub const PLACE: FeatureTypes = FeatureTypes(1 << 1);
    pub const HIGHWAY: FeatureTypes = FeatureTypes(1 << 2);
    pub const SQUARE: FeatureTypes = FeatureTypes(1 << 3);
    pub const BUILDING: FeatureTypes = FeatureTypes(1 << 4);
    pub const POI: FeatureTypes = FeatureTypes(1 << 5);

    pub fn insert(&mut self, other: FeatureTypes) {
        self.0 |= other.0;
    }

    pub fn has(&self, other: FeatureTypes) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> FeatureTypes {
        FeatureTypes(bits)
    }
}

/// One of the three geometry shapes a feature can carry, in projected
/// (mercator) coordinates. Area rings are closed (first == last), a line
/// has at least two distinct points, a point exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord<f64>),
    Line(LineString<f64>),
    Area(MultiPolygon<f64>),
}

impl Geometry {
    pub fn is_point(&self) -> bool {
        matches!(self, Geometry::Point(_))
    }

    pub fn is_line(&self) -> bool {
        matches!(self, Geometry::Line(_))
    }

    pub fn is_area(&self) -> bool {
        matches!(self, Geometry::Area(_))
    }

    /// A representative point: the point itself, a line's first vertex, or
    /// an area's centroid (first outer-ring vertex for degenerate rings).
    pub fn key_point(&self) -> Coord<f64> {
        match self {
            Geometry::Point(p) => *p,
            Geometry::Line(line) => line.0[0],
            Geometry::Area(area) => area
                .centroid()
                .map(|c| c.0)
                .unwrap_or_else(|| area.0[0].exterior().0[0]),
        }
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Geometry::Point(p) => Some(Rect::new(*p, *p)),
            Geometry::Line(line) => line.bounding_rect(),
            Geometry::Area(area) => area.bounding_rect(),
        }
    }
}

/// Side data collected for administrative features only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionInfo {
    pub admin_level: Option<u8>,
    pub place: Option<String>,
    pub iso_code: Option<String>,
    pub label_osm_id: Option<u64>,
}

impl RegionInfo {
    pub fn is_empty(&self) -> bool {
        self.admin_level.is_none()
            && self.place.is_none()
            && self.iso_code.is_none()
            && self.label_osm_id.is_none()
    }
}

/// The canonical post-classification object flowing through every `.tmp`
/// file: stable id, classified types, names, address sub-fields and one
/// geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBuilder {
    pub id: GeoObjectId,
    pub types: FeatureTypes,
    pub names: NameTable,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub region_info: RegionInfo,
    pub geometry: Geometry,
}

impl FeatureBuilder {
    pub fn new(id: GeoObjectId, geometry: Geometry) -> FeatureBuilder {
        FeatureBuilder {
            id,
            types: FeatureTypes::default(),
            names: NameTable::new(),
            street: None,
            house_number: None,
            region_info: RegionInfo::default(),
            geometry,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.names.default_name()
    }

    pub fn key_point(&self) -> Coord<f64> {
        self.geometry.key_point()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match &self.geometry {
            Geometry::Point(_) => Ok(()),
            Geometry::Line(line) => {
                let distinct = line.0.windows(2).any(|w| w[0] != w[1]);
                if line.0.len() < 2 || !distinct {
                    return Err(CoreError::InvariantViolation(format!(
                        "line feature {} has fewer than two distinct points",
                        self.id
                    )));
                }
                Ok(())
            }
            Geometry::Area(area) => {
                for polygon in &area.0 {
                    for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                        if ring.0.len() < 4 || ring.0.first() != ring.0.last() {
                            return Err(CoreError::InvariantViolation(format!(
                                "area feature {} has an open or degenerate ring",
                                self.id
                            )));
                        }
                    }
                }
                Ok(())
            }
        }
    }

    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<(), CoreError> {
        write_u64(sink, self.id.encoded())?;
        write_u32(sink, self.types.bits())?;

        write_varuint(sink, self.names.iter().count() as u64)?;
        for (locale, name) in self.names.iter() {
            write_string(sink, locale)?;
            write_string(sink, name)?;
        }

        write_option_string(sink, self.street.as_deref())?;
        write_option_string(sink, self.house_number.as_deref())?;

        write_u8(sink, u8::from(!self.region_info.is_empty()))?;
        if !self.region_info.is_empty() {
            write_u8(sink, self.region_info.admin_level.unwrap_or(0))?;
            write_option_string(sink, self.region_info.place.as_deref())?;
            write_option_string(sink, self.region_info.iso_code.as_deref())?;
            write_varuint(sink, self.region_info.label_osm_id.map_or(0, |id| id + 1))?;
        }

        match &self.geometry {
            Geometry::Point(p) => {
                write_u8(sink, 0)?;
                write_coord(sink, *p)?;
            }
            Geometry::Line(line) => {
                write_u8(sink, 1)?;
                write_varuint(sink, line.0.len() as u64)?;
                for &p in &line.0 {
                    write_coord(sink, p)?;
                }
            }
            Geometry::Area(area) => {
                write_u8(sink, 2)?;
                write_varuint(sink, area.0.len() as u64)?;
                for polygon in &area.0 {
                    write_ring(sink, polygon.exterior())?;
                    write_varuint(sink, polygon.interiors().len() as u64)?;
                    for hole in polygon.interiors() {
                        write_ring(sink, hole)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(source: &mut R) -> Result<FeatureBuilder, CoreError> {
        let id = GeoObjectId::from_encoded(read_u64(source)?);
        let types = FeatureTypes::from_bits(read_u32(source)?);

        let mut names = NameTable::new();
        let name_count = read_varuint(source)? as usize;
        for _ in 0..name_count {
            let locale = read_string(source)?;
            let name = read_string(source)?;
            names.set(locale, name);
        }

        let street = read_option_string(source)?;
        let house_number = read_option_string(source)?;

        let mut region_info = RegionInfo::default();
        if read_u8(source)? != 0 {
            let admin_level = read_u8(source)?;
            region_info.admin_level = (admin_level != 0).then_some(admin_level);
            region_info.place = read_option_string(source)?;
            region_info.iso_code = read_option_string(source)?;
            let label = read_varuint(source)?;
            region_info.label_osm_id = (label != 0).then(|| label - 1);
        }

        let geometry = match read_u8(source)? {
            0 => Geometry::Point(read_coord(source)?),
            1 => {
                let count = read_varuint(source)? as usize;
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    points.push(read_coord(source)?);
                }
                Geometry::Line(LineString(points))
            }
            2 => {
                let polygons = read_varuint(source)? as usize;
                let mut multi = Vec::with_capacity(polygons);
                for _ in 0..polygons {
                    let exterior = read_ring(source)?;
                    let holes = read_varuint(source)? as usize;
                    let mut interiors = Vec::with_capacity(holes);
                    for _ in 0..holes {
                        interiors.push(read_ring(source)?);
                    }
                    multi.push(Polygon::new(exterior, interiors));
                }
                Geometry::Area(MultiPolygon::new(multi))
            }
            tag => return Err(CoreError::BadFormat(format!("unknown geometry tag {tag}"))),
        };

        Ok(FeatureBuilder {
            id,
            types,
            names,
            street,
            house_number,
            region_info,
            geometry,
        })
    }
}

fn write_option_string<W: Write>(sink: &mut W, value: Option<&str>) -> Result<(), CoreError> {
    match value {
        Some(value) => {
            write_u8(sink, 1)?;
            write_string(sink, value)
        }
        None => write_u8(sink, 0),
    }
}

fn read_option_string<R: Read>(source: &mut R) -> Result<Option<String>, CoreError> {
    if read_u8(source)? == 0 {
        return Ok(None);
    }
    read_string(source).map(Some)
}

fn write_coord<W: Write>(sink: &mut W, p: Coord<f64>) -> Result<(), CoreError> {
    write_u64(sink, p.x.to_bits())?;
    write_u64(sink, p.y.to_bits())
}

fn read_coord<R: Read>(source: &mut R) -> Result<Coord<f64>, CoreError> {
    let x = f64::from_bits(read_u64(source)?);
    let y = f64::from_bits(read_u64(source)?);
    Ok(Coord { x, y })
}

fn write_ring<W: Write>(sink: &mut W, ring: &LineString<f64>) -> Result<(), CoreError> {
    write_varuint(sink, ring.0.len() as u64)?;
    for &p in &ring.0 {
        write_coord(sink, p)?;
    }
    Ok(())
}

fn read_ring<R: Read>(source: &mut R) -> Result<LineString<f64>, CoreError> {
    let count = read_varuint(source)? as usize;
    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        points.push(read_coord(source)?);
    }
    Ok(LineString(points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::GeoObjectKind;
    use geo::polygon;

    fn sample() -> FeatureBuilder {
        let mut fb = FeatureBuilder::new(
            GeoObjectId::new(GeoObjectKind::OsmWay, 273127),
            Geometry::Area(MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 0.0),
            ]])),
        );
        fb.types.insert(FeatureTypes::BUILDING);
        fb.names.set("default", "Дом");
        fb.names.set("en", "House");
        fb.street = Some("Arbat Street".into());
        fb.house_number = Some("7 к2".into());
        fb
    }

    #[test]
    fn round_trip() {
        let fb = sample();
        let mut buffer = Vec::new();
        fb.write_to(&mut buffer).unwrap();
        let restored = FeatureBuilder::read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(restored, fb);
    }

    #[test]
    fn validation_rejects_degenerate_rings() {
        // Polygon::new closes the ring, so a two-point input stays under the
        // four-point minimum of a closed triangle.
        let mut fb = sample();
        fb.geometry = Geometry::Area(MultiPolygon::new(vec![Polygon::new(
            LineString(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 0.0 }]),
            vec![],
        )]));
        assert!(fb.validate().is_err());
    }

    #[test]
    fn validation_rejects_degenerate_lines() {
        let mut fb = sample();
        fb.geometry = Geometry::Line(LineString(vec![
            Coord { x: 1.0, y: 1.0 },
            Coord { x: 1.0, y: 1.0 },
        ]));
        assert!(fb.validate().is_err());
    }
}
