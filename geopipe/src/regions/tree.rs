use super::place::{PlaceLevel, PlaceType};
use super::region::{PlacePoint, Region};
use crate::feature::{GeoObjectId, NameTable};
use geo::Coord;

/// A placed region: either an administrative polygon or an integrated place
/// point, together with its assigned hierarchy level.
#[derive(Debug, Clone)]
pub struct LevelRegion {
    pub level: PlaceLevel,
    pub source: RegionSource,
}

#[derive(Debug, Clone)]
pub enum RegionSource {
    Polygon(Region),
    Point(PlacePoint),
}

impl LevelRegion {
    pub fn from_region(level: PlaceLevel, region: Region) -> LevelRegion {
        LevelRegion {
            level,
            source: RegionSource::Polygon(region),
        }
    }

    pub fn from_place_point(point: PlacePoint) -> LevelRegion {
        LevelRegion {
            level: point.place_level(),
            source: RegionSource::Point(point),
        }
    }

    pub fn id(&self) -> GeoObjectId {
        match &self.source {
            RegionSource::Polygon(region) => region.id,
            RegionSource::Point(point) => point.id,
        }
    }

    pub fn names(&self) -> &NameTable {
        match &self.source {
            RegionSource::Polygon(region) => &region.names,
            RegionSource::Point(point) => &point.names,
        }
    }

    pub fn name(&self) -> &str {
        self.names().default_name().unwrap_or_default()
    }

    pub fn place_type(&self) -> PlaceType {
        match &self.source {
            RegionSource::Polygon(region) => region.place_type,
            RegionSource::Point(point) => point.place_type,
        }
    }

    pub fn center(&self) -> Coord<f64> {
        match &self.source {
            RegionSource::Polygon(region) => region.center(),
            RegionSource::Point(point) => point.point,
        }
    }

    pub fn polygon(&self) -> Option<&Region> {
        match &self.source {
            RegionSource::Polygon(region) => Some(region),
            RegionSource::Point(_) => None,
        }
    }

    /// KV `kind` string: the explicit place kind, else a level default.
    pub fn kind_string(&self) -> &'static str {
        let place = self.place_type();
        if place != PlaceType::Unknown {
            return place.as_str();
        }
        match self.level {
            PlaceLevel::Country => "country",
            PlaceLevel::Region => "state",
            PlaceLevel::Subregion => "district",
            PlaceLevel::Locality => "city",
            PlaceLevel::Suburb => "suburb",
            PlaceLevel::Sublocality => "neighbourhood",
            PlaceLevel::Unknown => "unknown",
        }
    }
}

pub type NodeId = usize;

struct NodeData {
    data: LevelRegion,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Region trees live in an arena: parent/child links are indices, so the
/// cyclic parent↔child shape needs no shared ownership.
#[derive(Default)]
pub struct Forest {
    nodes: Vec<NodeData>,
    roots: Vec<NodeId>,
}

impl Forest {
    pub fn new() -> Forest {
        Forest::default()
    }

    pub fn add_node(&mut self, data: LevelRegion) -> NodeId {
        self.nodes.push(NodeData {
            data,
            parent: None,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn add_root(&mut self, data: LevelRegion) -> NodeId {
        let id = self.add_node(data);
        self.roots.push(id);
        id
    }

    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) {
        debug_assert_ne!(child, parent);
        debug_assert!(self.nodes[child].parent.is_none());
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    pub fn get(&self, id: NodeId) -> &LevelRegion {
        &self.nodes[id].data
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut LevelRegion {
        &mut self.nodes[id].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn roots(&self) -> &[NodeId] {
        self.roots.as_slice()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes[id].parent;
        while let Some(node) = current {
            out.push(node);
            current = self.nodes[node].parent;
        }
        out
    }

    /// Depth-first walk of every tree, parents before children.
    pub fn for_each<F: FnMut(NodeId)>(&self, mut f: F) {
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            f(node);
            stack.extend(self.nodes[node].children.iter().rev());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::region::test_support::rect_region;

    #[test]
    fn arena_links() {
        let mut forest = Forest::new();
        let country = forest.add_root(LevelRegion::from_region(
            PlaceLevel::Country,
            rect_region(1, "country", (0.0, 0.0), (100.0, 100.0)),
        ));
        let region = forest.add_node(LevelRegion::from_region(
            PlaceLevel::Region,
            rect_region(2, "state", (10.0, 10.0), (50.0, 50.0)),
        ));
        let locality = forest.add_node(LevelRegion::from_region(
            PlaceLevel::Locality,
            rect_region(3, "city", (20.0, 20.0), (25.0, 25.0)),
        ));
        forest.set_parent(region, country);
        forest.set_parent(locality, region);

        assert_eq!(forest.ancestors(locality), vec![region, country]);
        assert_eq!(forest.children(country), &[region]);

        let mut order = Vec::new();
        forest.for_each(|n| order.push(n));
        assert_eq!(order, vec![country, region, locality]);
    }
}
