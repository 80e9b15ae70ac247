// src/taxonomy.rs
//! Closed category set for DATEX II record types.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Accident,
    AbnormalTraffic,
    MaintenanceWorks,
    ConstructionWorks,
    RoadManagement,
    Obstruction,
    RoadConditions,
    TrafficManagement,
    Event,
    ServiceDisruption,
    RoadUserMessage,
    Other,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Accident,
        Category::AbnormalTraffic,
        Category::MaintenanceWorks,
        Category::ConstructionWorks,
        Category::RoadManagement,
        Category::Obstruction,
        Category::RoadConditions,
        Category::TrafficManagement,
        Category::Event,
        Category::ServiceDisruption,
        Category::RoadUserMessage,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Accident => "Accident",
            Category::AbnormalTraffic => "AbnormalTraffic",
            Category::MaintenanceWorks => "MaintenanceWorks",
            Category::ConstructionWorks => "ConstructionWorks",
            Category::RoadManagement => "RoadManagement",
            Category::Obstruction => "Obstruction",
            Category::RoadConditions => "RoadConditions",
            Category::TrafficManagement => "TrafficManagement",
            Category::Event => "Event",
            Category::ServiceDisruption => "ServiceDisruption",
            Category::RoadUserMessage => "RoadUserMessage",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or(())
    }
}

/// Raw `xsi:type` local names → category. Built once, read-only afterwards.
static TABLE: Lazy<HashMap<&'static str, Category>> = Lazy::new(|| {
    use Category::*;
    HashMap::from([
        ("Accident", Accident),
        ("AbnormalTraffic", AbnormalTraffic),
        ("MaintenanceWorks", MaintenanceWorks),
        ("ConstructionWorks", ConstructionWorks),
        ("RoadOrCarriagewayOrLaneManagement", RoadManagement),
        ("GeneralObstruction", Obstruction),
        ("VehicleObstruction", Obstruction),
        ("AnimalPresenceObstruction", Obstruction),
        ("InfrastructureDamageObstruction", Obstruction),
        ("EnvironmentalObstruction", Obstruction),
        ("NonWeatherRelatedRoadConditions", RoadConditions),
        ("PoorEnvironmentConditions", RoadConditions),
        ("OperatorAction", TrafficManagement),
        ("GeneralNetworkManagement", TrafficManagement),
        ("ReroutingManagement", TrafficManagement),
        ("SpeedManagement", TrafficManagement),
        ("PublicEvent", Event),
        ("RoadsideServiceDisruption", ServiceDisruption),
        ("GeneralInstructionOrMessageToRoadUsers", RoadUserMessage),
    ])
});

/// Drop a leading `prefix:` token, e.g. `ns2:Accident` → `Accident`.
pub fn strip_prefix(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.rsplit_once(':') {
        Some((_, local)) => local,
        None => raw,
    }
}

/// Total: every input lands on exactly one category. Category names map to
/// themselves, so classifying a category's own name is a no-op.
pub fn classify(raw: &str) -> Category {
    let local = strip_prefix(raw);
    TABLE
        .get(local)
        .copied()
        .or_else(|| local.parse().ok())
        .unwrap_or(Category::Other)
}

/// True when `raw` resolves through the table or names a category directly.
pub fn is_mapped(raw: &str) -> bool {
    let local = strip_prefix(raw);
    TABLE.contains_key(local) || local.parse::<Category>().is_ok()
}
