/// Values of the OSM `place` tag the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceType {
    Country,
    State,
    Province,
    District,
    County,
    Municipality,
    City,
    Town,
    Village,
    Hamlet,
    IsolatedDwelling,
    Suburb,
    Quarter,
    Neighbourhood,
    Unknown,
}

impl PlaceType {
    pub fn from_tag(value: &str) -> PlaceType {
        match value {
            "country" => PlaceType::Country,
            "state" => PlaceType::State,
            "province" => PlaceType::Province,
            "district" => PlaceType::District,
            "county" => PlaceType::County,
            "municipality" => PlaceType::Municipality,
            "city" => PlaceType::City,
            "town" => PlaceType::Town,
            "village" => PlaceType::Village,
            "hamlet" => PlaceType::Hamlet,
            "isolated_dwelling" => PlaceType::IsolatedDwelling,
            "suburb" => PlaceType::Suburb,
            "quarter" => PlaceType::Quarter,
            "neighbourhood" => PlaceType::Neighbourhood,
            _ => PlaceType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceType::Country => "country",
            PlaceType::State => "state",
            PlaceType::Province => "province",
            PlaceType::District => "district",
            PlaceType::County => "county",
            PlaceType::Municipality => "municipality",
            PlaceType::City => "city",
            PlaceType::Town => "town",
            PlaceType::Village => "village",
            PlaceType::Hamlet => "hamlet",
            PlaceType::IsolatedDwelling => "isolated_dwelling",
            PlaceType::Suburb => "suburb",
            PlaceType::Quarter => "quarter",
            PlaceType::Neighbourhood => "neighbourhood",
            PlaceType::Unknown => "unknown",
        }
    }
}

/// Address hierarchy level a region ends up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlaceLevel {
    Unknown,
    Country,
    Region,
    Subregion,
    Locality,
    Suburb,
    Sublocality,
}

impl PlaceLevel {
    pub fn from_place_type(place: PlaceType) -> PlaceLevel {
        match place {
            PlaceType::Country => PlaceLevel::Country,
            PlaceType::State | PlaceType::Province => PlaceLevel::Region,
            PlaceType::District | PlaceType::County | PlaceType::Municipality => {
                PlaceLevel::Subregion
            }
            PlaceType::City
            | PlaceType::Town
            | PlaceType::Village
            | PlaceType::Hamlet
            | PlaceType::IsolatedDwelling => PlaceLevel::Locality,
            PlaceType::Suburb | PlaceType::Quarter => PlaceLevel::Suburb,
            PlaceType::Neighbourhood => PlaceLevel::Sublocality,
            PlaceType::Unknown => PlaceLevel::Unknown,
        }
    }

    /// Rank serialized to KV: deeper levels rank higher.
    pub fn rank(&self) -> u8 {
        match self {
            PlaceLevel::Unknown => 0,
            PlaceLevel::Country => 1,
            PlaceLevel::Region => 2,
            PlaceLevel::Subregion => 3,
            PlaceLevel::Locality => 4,
            PlaceLevel::Suburb => 5,
            PlaceLevel::Sublocality => 6,
        }
    }

    /// The address field this level fills in a KV record.
    pub fn address_field(&self) -> Option<&'static str> {
        match self {
            PlaceLevel::Unknown => None,
            PlaceLevel::Country => Some("country"),
            PlaceLevel::Region => Some("region"),
            PlaceLevel::Subregion => Some("subregion"),
            PlaceLevel::Locality => Some("locality"),
            PlaceLevel::Suburb => Some("suburb"),
            PlaceLevel::Sublocality => Some("sublocality"),
        }
    }
}

/// OSM `admin_level` values of interest; anything unparsable is Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AdminLevel(pub Option<u8>);

impl AdminLevel {
    pub const UNKNOWN: AdminLevel = AdminLevel(None);
    pub const TWO: AdminLevel = AdminLevel(Some(2));

    pub fn from_tag(value: &str) -> AdminLevel {
        AdminLevel(value.trim().parse().ok().filter(|&v| (1..=12).contains(&v)))
    }

    pub fn get(&self) -> Option<u8> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping() {
        assert_eq!(
            PlaceLevel::from_place_type(PlaceType::from_tag("city")),
            PlaceLevel::Locality
        );
        assert_eq!(
            PlaceLevel::from_place_type(PlaceType::from_tag("province")),
            PlaceLevel::Region
        );
        assert_eq!(
            PlaceLevel::from_place_type(PlaceType::from_tag("borough")),
            PlaceLevel::Unknown
        );
    }

    #[test]
    fn ranks_are_ordered() {
        assert!(PlaceLevel::Country.rank() < PlaceLevel::Locality.rank());
        assert!(PlaceLevel::Locality.rank() < PlaceLevel::Sublocality.rank());
    }

    #[test]
    fn admin_level_parse() {
        assert_eq!(AdminLevel::from_tag("2"), AdminLevel::TWO);
        assert_eq!(AdminLevel::from_tag("x"), AdminLevel::UNKNOWN);
        assert_eq!(AdminLevel::from_tag("99"), AdminLevel::UNKNOWN);
    }
}
