//! Built-in unit declarations
//!
//! Each entry names the unit, what it reads and writes, and the system prompt
//! used when it is backed by a text-generation backend. Dependency inputs are
//! always optional so that a failed upstream unit degrades its dependents
//! instead of blocking them.

use super::types::{fields, slots};
use super::UnitDescriptor;

pub const TIME_ALLOCATOR: &str = "time_allocator";
pub const PREFERENCE_MATCHER: &str = "preference_matcher";
pub const WEATHER_SCOUT: &str = "weather_scout";
pub const CLUSTER_BUILDER: &str = "cluster_builder";
pub const HIDDEN_GEMS: &str = "hidden_gems";
pub const LOGISTICS_PLANNER: &str = "logistics_planner";
pub const PHOTO_SCOUT: &str = "photo_scout";
pub const STORY_WEAVER: &str = "story_weaver";

pub struct UnitSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub depends_on: &'static [&'static str],
    pub required_inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    pub supports_refinement: bool,
    pub system_prompt: &'static str,
}

const BASE_INPUTS: &[&str] = &[fields::CITY, fields::NIGHTS, fields::PREFERENCES];

const JSON_RULES: &str = "Respond with a single JSON object and nothing else. \
Besides the requested keys you may include \"confidence\" (0-100), \"gaps\" (array of \
strings describing what you could not cover) and \"suggestions\" (array of \
{\"target\": unit name, \"message\": text}).";

pub static CATALOG: &[UnitSpec] = &[
    UnitSpec {
        name: TIME_ALLOCATOR,
        description: "Splits the stay into day/period blocks",
        depends_on: &[],
        required_inputs: BASE_INPUTS,
        outputs: &[slots::TIME_BLOCKS],
        supports_refinement: true,
        system_prompt: "You plan how a traveller spends their nights in one city. \
Return {\"timeBlocks\": [{\"day\": 1, \"period\": \"morning|afternoon|evening\", \
\"activity\": text, \"area\": text, \"durationHours\": number}]} with at least two \
blocks per day, respecting the requested pace.",
    },
    UnitSpec {
        name: PREFERENCE_MATCHER,
        description: "Scores how well the city fits stated interests",
        depends_on: &[],
        required_inputs: BASE_INPUTS,
        outputs: &[slots::PREFERENCE_MATCH],
        supports_refinement: true,
        system_prompt: "You judge how well a city suits a traveller. Return \
{\"preferenceMatch\": {\"score\": 0-100, \"matchedInterests\": [text], \
\"unmatchedInterests\": [text], \"rationale\": text}}.",
    },
    UnitSpec {
        name: WEATHER_SCOUT,
        description: "Weather outlook for the stay",
        depends_on: &[],
        required_inputs: BASE_INPUTS,
        outputs: &[slots::WEATHER],
        supports_refinement: false,
        system_prompt: "You summarise expected weather. Return {\"weather\": \
{\"summary\": text, \"lowC\": number, \"highC\": number, \"conditions\": [text]}}.",
    },
    UnitSpec {
        name: CLUSTER_BUILDER,
        description: "Groups places into walkable neighbourhood clusters",
        depends_on: &[TIME_ALLOCATOR],
        required_inputs: BASE_INPUTS,
        outputs: &[slots::CLUSTERS],
        supports_refinement: true,
        system_prompt: "You list notable places in a city. Return {\"places\": \
[{\"name\": text, \"category\": text, \"area\": neighbourhood name}]} with at \
least eight places spread over several neighbourhoods.",
    },
    UnitSpec {
        name: HIDDEN_GEMS,
        description: "Off-the-beaten-path finds including food",
        depends_on: &[PREFERENCE_MATCHER],
        required_inputs: BASE_INPUTS,
        outputs: &[slots::HIDDEN_GEMS],
        supports_refinement: true,
        system_prompt: "You find lesser-known spots locals love. Return \
{\"hiddenGems\": [{\"name\": text, \"category\": \"food|culture|nature|shopping|nightlife\", \
\"why\": text, \"dietary\": [tags such as vegetarian, vegan, halal]}]} with at least \
three entries and at least one food entry that honours any dietary requirement.",
    },
    UnitSpec {
        name: LOGISTICS_PLANNER,
        description: "Arrival, transport and practical tips",
        depends_on: &[CLUSTER_BUILDER, WEATHER_SCOUT],
        required_inputs: &[
            fields::CITY,
            fields::NIGHTS,
            fields::PREFERENCES,
            fields::TRIP_CONTEXT,
        ],
        outputs: &[slots::LOGISTICS],
        supports_refinement: true,
        system_prompt: "You handle practical logistics for a city stay. Return \
{\"logistics\": {\"arrival\": text, \"transport\": text, \"tips\": [text]}} with at \
least two tips, taking weather and the neighbourhood clusters into account.",
    },
    UnitSpec {
        name: PHOTO_SCOUT,
        description: "Photo spots timed to light and weather",
        depends_on: &[CLUSTER_BUILDER, WEATHER_SCOUT],
        required_inputs: BASE_INPUTS,
        outputs: &[slots::PHOTO_SPOTS],
        supports_refinement: false,
        system_prompt: "You recommend photo locations. Return {\"photoSpots\": \
[{\"name\": text, \"bestLight\": text, \"tip\": text}]}.",
    },
    UnitSpec {
        name: STORY_WEAVER,
        description: "Narrative and synthesis over every other output",
        depends_on: &[
            TIME_ALLOCATOR,
            PREFERENCE_MATCHER,
            WEATHER_SCOUT,
            CLUSTER_BUILDER,
            HIDDEN_GEMS,
            LOGISTICS_PLANNER,
        ],
        required_inputs: BASE_INPUTS,
        outputs: &[slots::NARRATIVE, slots::SYNTHESIS],
        supports_refinement: true,
        system_prompt: "You write the story of a traveller's stay from the analysis \
provided. Return {\"narrative\": {\"headline\": text, \"theme\": text, \"story\": \
several paragraphs}, \"synthesis\": {\"summary\": text, \"highlights\": [at least \
three items], \"themes\": [text]}}.",
    },
];

pub fn spec(name: &str) -> Option<&'static UnitSpec> {
    CATALOG.iter().find(|s| s.name == name)
}

pub fn is_known_unit(name: &str) -> bool {
    spec(name).is_some()
}

pub fn json_rules() -> &'static str {
    JSON_RULES
}

impl UnitSpec {
    pub fn descriptor(&self) -> UnitDescriptor {
        UnitDescriptor {
            name: self.name.to_string(),
            description: self.description.to_string(),
            required_inputs: self.required_inputs.iter().map(|s| s.to_string()).collect(),
            optional_inputs: self
                .depends_on
                .iter()
                .map(|dep| fields::dependency(dep))
                .chain(std::iter::once(
                    fields::REFINEMENT_INSTRUCTIONS.to_string(),
                ))
                .chain(
                    (!self.required_inputs.contains(&fields::TRIP_CONTEXT))
                        .then(|| fields::TRIP_CONTEXT.to_string()),
                )
                .collect(),
            outputs: self.outputs.iter().map(|s| s.to_string()).collect(),
            depends_on: self.depends_on.iter().map(|s| s.to_string()).collect(),
            supports_refinement: self.supports_refinement,
        }
    }
}
