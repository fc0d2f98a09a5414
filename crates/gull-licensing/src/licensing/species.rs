use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{ActivityDetail, ActivityFlow, ActivityId, SpeciesSet};
use super::repository::{RepositoryError, StoreTransaction};

/// Gull species covered by a control licence, in the order they are rendered and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    HerringGull,
    BlackHeadedGull,
    CommonGull,
    GreatBlackBackedGull,
    LesserBlackBackedGull,
}

/// Static facts about a species shared by storage and notification rendering.
#[derive(Debug)]
pub struct SpeciesDescriptor {
    pub species: Species,
    pub label: &'static str,
    pub column: &'static str,
    pub conservation_status: &'static str,
}

static SPECIES_TABLE: [SpeciesDescriptor; 5] = [
    SpeciesDescriptor {
        species: Species::HerringGull,
        label: "Herring gull",
        column: "herring_gull_id",
        conservation_status: "Herring gull is red-listed as a bird of conservation concern in the UK. \
Its breeding population has declined by more than half since the 1970s, so control must be limited \
to the activities and numbers set out in this licence.",
    },
    SpeciesDescriptor {
        species: Species::BlackHeadedGull,
        label: "Black-headed gull",
        column: "black_headed_gull_id",
        conservation_status: "Black-headed gull is amber-listed as a bird of conservation concern in the UK \
following moderate declines in its breeding population.",
    },
    SpeciesDescriptor {
        species: Species::CommonGull,
        label: "Common gull",
        column: "common_gull_id",
        conservation_status: "Common gull is amber-listed as a bird of conservation concern in the UK. \
Scotland holds the large majority of the UK breeding population.",
    },
    SpeciesDescriptor {
        species: Species::GreatBlackBackedGull,
        label: "Great black-backed gull",
        column: "great_black_backed_gull_id",
        conservation_status: "Great black-backed gull is amber-listed as a bird of conservation concern in \
the UK and the UK holds an internationally important share of its breeding population.",
    },
    SpeciesDescriptor {
        species: Species::LesserBlackBackedGull,
        label: "Lesser black-backed gull",
        column: "lesser_black_backed_gull_id",
        conservation_status: "Lesser black-backed gull is amber-listed as a bird of conservation concern in \
the UK because of declines at several of its largest colonies.",
    },
];

impl Species {
    pub const ALL: [Species; 5] = [
        Species::HerringGull,
        Species::BlackHeadedGull,
        Species::CommonGull,
        Species::GreatBlackBackedGull,
        Species::LesserBlackBackedGull,
    ];

    pub fn descriptor(self) -> &'static SpeciesDescriptor {
        &SPECIES_TABLE[self as usize]
    }

    pub fn label(self) -> &'static str {
        self.descriptor().label
    }

    /// Column holding this species' activity key on the species aggregate tables.
    pub fn column(self) -> &'static str {
        self.descriptor().column
    }

    pub fn conservation_status(self) -> &'static str {
        self.descriptor().conservation_status
    }
}

/// Insert one activity row per non-empty species payload, then the aggregate row linking them.
pub(crate) async fn insert_species_activities(
    tx: &mut dyn StoreTransaction,
    flow: ActivityFlow,
    payloads: &BTreeMap<Species, ActivityDetail>,
) -> Result<SpeciesSet, RepositoryError> {
    let mut keys: BTreeMap<Species, ActivityId> = BTreeMap::new();
    for species in Species::ALL {
        let Some(detail) = payloads.get(&species).filter(|detail| !detail.is_empty()) else {
            continue;
        };
        let activity_id = tx.insert_activity(flow, detail).await?;
        keys.insert(species, activity_id);
    }

    let id = tx.insert_species_set(flow, &keys).await?;
    Ok(SpeciesSet { id, keys })
}
