use serde::{Deserialize, Serialize};

/// Coarse geographic bucket used only to bias matching. Derived from
/// address text on every use, never persisted on a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    BackBay,
    BeaconHill,
    NorthEnd,
    SouthEnd,
    Cambridge,
    Other,
}

const KEYWORDS: &[(&str, Zone)] = &[
    ("back bay", Zone::BackBay),
    ("boylston", Zone::BackBay),
    ("newbury", Zone::BackBay),
    ("beacon hill", Zone::BeaconHill),
    ("beacon st", Zone::BeaconHill),
    ("north end", Zone::NorthEnd),
    ("hanover", Zone::NorthEnd),
    ("south end", Zone::SouthEnd),
    ("tremont", Zone::SouthEnd),
    ("cambridge", Zone::Cambridge),
    ("harvard", Zone::Cambridge),
    ("kendall", Zone::Cambridge),
];

/// Maps a free-text address to a zone by case-insensitive substring
/// match. Total: anything unrecognized is `Zone::Other`.
pub fn classify(address: &str) -> Zone {
    let lowered = address.to_lowercase();

    KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, zone)| *zone)
        .unwrap_or(Zone::Other)
}
