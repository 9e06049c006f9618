use std::collections::HashMap;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::entities::{Team, TeamAlias};

/// Which lookup produced a match. Recorded on every resolution so audits can
/// tell a curated alias hit from a mascot-stripped guess, and so successful
/// normalized/mascot hits can be backfilled into the alias table offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionStep {
    CanonicalName,
    SourceAlias,
    GlobalAlias,
    Normalized,
    MascotStripped,
}

impl ResolutionStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStep::CanonicalName => "canonical",
            ResolutionStep::SourceAlias => "source_alias",
            ResolutionStep::GlobalAlias => "global_alias",
            ResolutionStep::Normalized => "normalized",
            ResolutionStep::MascotStripped => "mascot_stripped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub team_id: u32,
    pub canonical_name: String,
    pub step: ResolutionStep,
    /// The exact string the winning lookup keyed on.
    pub matched_via: String,
}

/// Terminal outcomes. `NonMajor` and `Unresolved` both block the owning
/// record; the distinction matters for curation (a non-major name is known
/// and deliberately excluded, an unresolved one needs a human).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolveOutcome {
    Resolved(Resolution),
    NonMajor { raw_name: String },
    Unresolved { raw_name: String },
}

impl ResolveOutcome {
    pub fn resolved(&self) -> Option<&Resolution> {
        match self {
            ResolveOutcome::Resolved(r) => Some(r),
            _ => None,
        }
    }
}

/// Mascot and suffix tokens stripped in step 4. Only exact suffix matches
/// count; "Duke Blue Devils" -> "Duke", but "Wildcats" alone never matches a
/// different institution's root name because the remainder must still hit a
/// canonical name exactly.
static MASCOT_SUFFIXES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "wildcats",
        "tigers",
        "bears",
        "bulldogs",
        "eagles",
        "hawks",
        "cardinals",
        "hurricanes",
        "gators",
        "terrapins",
        "crusaders",
        "hornets",
        "jayhawks",
        "wolverines",
        "buckeyes",
        "spartans",
        "hoosiers",
        "boilermakers",
        "fighting irish",
        "blue devils",
        "tar heels",
        "cavaliers",
        "seminoles",
        "yellow jackets",
        "blue jays",
        "razorbacks",
        "volunteers",
        "commodores",
        "aggies",
        "longhorns",
        "sooners",
        "cyclones",
        "mountaineers",
        "musketeers",
        "billikens",
        "gaels",
        "zags",
    ]
});

/// Leading-abbreviation expansions applied during normalization. Exactly one
/// expansion fires per name (the first that matches), mirroring how the
/// curated alias data was originally built.
static ABBREVIATION_EXPANSIONS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("st ", "state "),
        ("csu ", "cal state "),
        ("nc ", "north carolina "),
        ("sc ", "south carolina "),
        ("usc ", "southern california "),
        ("unc ", "north carolina "),
        ("unlv ", "nevada las vegas "),
        ("utep ", "texas el paso "),
        ("utsa ", "texas san antonio "),
        ("uab ", "alabama birmingham "),
        ("vcu ", "virginia commonwealth "),
        ("etsu ", "east tennessee state "),
        ("fgcu ", "florida gulf coast "),
        ("fau ", "florida atlantic "),
        ("fiu ", "florida international "),
        ("ucf ", "central florida "),
        ("umbc ", "maryland baltimore county "),
        ("uic ", "illinois chicago "),
        ("uri ", "rhode island "),
        ("usf ", "south florida "),
    ]
});

/// Case fold, drop punctuation, collapse whitespace, expand a leading
/// abbreviation. Shared by directory construction and lookup so both sides
/// of the exact-match comparison went through the same pipe.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '.' || ch == '\'' || ch == '&' {
            out.push(' ');
        }
    }
    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    let with_trailing = format!("{collapsed} ");
    for (abbr, full) in ABBREVIATION_EXPANSIONS.iter() {
        if with_trailing.starts_with(abbr) {
            let expanded = format!("{full}{}", &with_trailing[abbr.len()..]);
            return expanded.trim().to_string();
        }
    }
    collapsed
}

fn strip_mascot(normalized: &str) -> Option<String> {
    for suffix in MASCOT_SUFFIXES.iter() {
        if let Some(stem) = normalized.strip_suffix(suffix) {
            let stem = stem.trim_end();
            if !stem.is_empty() {
                return Some(stem.to_string());
            }
        }
    }
    None
}

/// Immutable-after-load resolver. Built once from curated data and passed by
/// reference into every consumer; a curation update produces a fresh
/// directory rather than mutating a live one.
#[derive(Debug)]
pub struct TeamDirectory {
    teams: HashMap<u32, Team>,
    by_canonical: HashMap<String, u32>,
    by_normalized: HashMap<String, u32>,
    source_aliases: HashMap<(String, String), u32>,
    global_aliases: HashMap<String, u32>,
    non_major: HashMap<String, String>,
}

impl TeamDirectory {
    /// `non_major_names` is the configured block list of programs outside the
    /// covered division. Alias rows referencing unknown team ids are a
    /// curation defect and fail the load.
    pub fn load(
        teams: Vec<Team>,
        aliases: Vec<TeamAlias>,
        non_major_names: Vec<String>,
    ) -> Result<TeamDirectory> {
        let mut by_canonical = HashMap::new();
        let mut by_normalized = HashMap::new();
        let mut team_map = HashMap::new();

        for team in teams {
            let key = team.canonical_name.trim().to_string();
            if by_canonical.insert(key.clone(), team.team_id).is_some() {
                return Err(anyhow!("duplicate canonical team name: {key}"));
            }
            let norm = normalize_name(&team.canonical_name);
            if let Some(existing) = by_normalized.insert(norm.clone(), team.team_id) {
                if existing != team.team_id {
                    return Err(anyhow!(
                        "canonical names collide after normalization: {norm}"
                    ));
                }
            }
            team_map.insert(team.team_id, team);
        }

        let mut source_aliases = HashMap::new();
        let mut global_aliases = HashMap::new();
        for alias in aliases {
            if !team_map.contains_key(&alias.team_id) {
                return Err(anyhow!(
                    "alias '{}' references unknown team id {}",
                    alias.alias,
                    alias.team_id
                ));
            }
            let key = normalize_name(&alias.alias);
            match alias.source {
                Some(source) => {
                    let scoped = (source.trim().to_ascii_lowercase(), key);
                    if let Some(existing) = source_aliases.insert(scoped.clone(), alias.team_id) {
                        if existing != alias.team_id {
                            return Err(anyhow!(
                                "alias '{}' maps to two teams within source '{}'",
                                alias.alias,
                                scoped.0
                            ));
                        }
                    }
                }
                None => {
                    if let Some(existing) = global_aliases.insert(key.clone(), alias.team_id) {
                        if existing != alias.team_id {
                            return Err(anyhow!("global alias '{}' maps to two teams", alias.alias));
                        }
                    }
                }
            }
        }

        let non_major = non_major_names
            .into_iter()
            .map(|name| (normalize_name(&name), name))
            .collect();

        Ok(TeamDirectory {
            teams: team_map,
            by_canonical,
            by_normalized,
            source_aliases,
            global_aliases,
            non_major,
        })
    }

    pub fn team(&self, team_id: u32) -> Option<&Team> {
        self.teams.get(&team_id)
    }

    pub fn team_count(&self) -> usize {
        self.teams.len()
    }

    /// Deterministic, exact-match-only resolution. Steps run in a fixed
    /// order and stop at the first hit; no edit distance, no phonetics --
    /// a cross-institution collision is worse than an unresolved name.
    pub fn resolve(&self, raw_name: &str, source: &str) -> ResolveOutcome {
        let trimmed = raw_name.trim();
        if trimmed.is_empty() {
            return ResolveOutcome::Unresolved {
                raw_name: raw_name.to_string(),
            };
        }

        // 1. Exact canonical name.
        if let Some(&team_id) = self.by_canonical.get(trimmed) {
            return self.hit(team_id, ResolutionStep::CanonicalName, trimmed);
        }

        // 2. Curated aliases, source-scoped first.
        let normalized = normalize_name(trimmed);
        let scoped = (source.trim().to_ascii_lowercase(), normalized.clone());
        if let Some(&team_id) = self.source_aliases.get(&scoped) {
            return self.hit(team_id, ResolutionStep::SourceAlias, &normalized);
        }
        if let Some(&team_id) = self.global_aliases.get(&normalized) {
            return self.hit(team_id, ResolutionStep::GlobalAlias, &normalized);
        }

        // 3. Exact match after normalization.
        if let Some(&team_id) = self.by_normalized.get(&normalized) {
            return self.hit(team_id, ResolutionStep::Normalized, &normalized);
        }

        // 4. Exact match after stripping a known mascot suffix.
        if let Some(stem) = strip_mascot(&normalized) {
            if let Some(&team_id) = self.by_normalized.get(&stem) {
                return self.hit(team_id, ResolutionStep::MascotStripped, &stem);
            }
        }

        // 5. Configured non-major block list is a terminal rejection.
        if self.non_major.contains_key(&normalized) {
            return ResolveOutcome::NonMajor {
                raw_name: raw_name.to_string(),
            };
        }

        ResolveOutcome::Unresolved {
            raw_name: raw_name.to_string(),
        }
    }

    fn hit(&self, team_id: u32, step: ResolutionStep, matched_via: &str) -> ResolveOutcome {
        let canonical_name = self
            .teams
            .get(&team_id)
            .map(|t| t.canonical_name.clone())
            .unwrap_or_default();
        ResolveOutcome::Resolved(Resolution {
            team_id,
            canonical_name,
            step,
            matched_via: matched_via.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(id: u32, name: &str) -> Team {
        Team {
            team_id: id,
            canonical_name: name.to_string(),
            non_major: false,
        }
    }

    fn directory() -> TeamDirectory {
        TeamDirectory::load(
            vec![
                team(1, "Duke"),
                team(2, "North Carolina"),
                team(3, "Michigan State"),
                team(4, "Saint Mary's"),
            ],
            vec![
                TeamAlias {
                    alias: "UNC Tar Heels".to_string(),
                    source: Some("oddsfeed".to_string()),
                    team_id: 2,
                },
                TeamAlias {
                    alias: "MSU".to_string(),
                    source: None,
                    team_id: 3,
                },
            ],
            vec!["Quinnipiac".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn canonical_name_wins_first() {
        let dir = directory();
        let res = dir.resolve("Duke", "anything").resolved().cloned().unwrap();
        assert_eq!(res.team_id, 1);
        assert_eq!(res.step, ResolutionStep::CanonicalName);
    }

    #[test]
    fn source_alias_beats_global() {
        let dir = directory();
        let res = dir
            .resolve("UNC Tar Heels", "oddsfeed")
            .resolved()
            .cloned()
            .unwrap();
        assert_eq!(res.team_id, 2);
        assert_eq!(res.step, ResolutionStep::SourceAlias);
    }

    #[test]
    fn global_alias_used_when_source_has_none() {
        let dir = directory();
        let res = dir.resolve("MSU", "scorefeed").resolved().cloned().unwrap();
        assert_eq!(res.team_id, 3);
        assert_eq!(res.step, ResolutionStep::GlobalAlias);
    }

    #[test]
    fn normalization_handles_punctuation_and_case() {
        let dir = directory();
        let res = dir
            .resolve("saint   mary's", "scorefeed")
            .resolved()
            .cloned()
            .unwrap();
        assert_eq!(res.team_id, 4);
        assert_eq!(res.step, ResolutionStep::Normalized);
    }

    #[test]
    fn mascot_suffix_strips_to_canonical() {
        let dir = directory();
        let res = dir
            .resolve("Duke Blue Devils", "oddsfeed")
            .resolved()
            .cloned()
            .unwrap();
        assert_eq!(res.team_id, 1);
        assert_eq!(res.step, ResolutionStep::MascotStripped);
    }

    #[test]
    fn mascot_alone_does_not_resolve() {
        let dir = directory();
        assert!(matches!(
            dir.resolve("Blue Devils", "oddsfeed"),
            ResolveOutcome::Unresolved { .. }
        ));
    }

    #[test]
    fn non_major_is_terminal() {
        let dir = directory();
        assert!(matches!(
            dir.resolve("Quinnipiac", "scorefeed"),
            ResolveOutcome::NonMajor { .. }
        ));
    }

    #[test]
    fn unknown_name_is_unresolved_not_guessed() {
        let dir = directory();
        assert!(matches!(
            dir.resolve("Dook", "scorefeed"),
            ResolveOutcome::Unresolved { .. }
        ));
    }

    #[test]
    fn resolution_is_deterministic() {
        let dir = directory();
        let a = dir.resolve("Duke Blue Devils", "oddsfeed");
        let b = dir.resolve("Duke Blue Devils", "oddsfeed");
        assert_eq!(a, b);
    }

    #[test]
    fn duplicate_canonical_names_fail_load() {
        let err = TeamDirectory::load(vec![team(1, "Duke"), team(2, "Duke")], vec![], vec![]);
        assert!(err.is_err());
    }

    #[test]
    fn alias_colliding_within_source_fails_load() {
        let err = TeamDirectory::load(
            vec![team(1, "Duke"), team(2, "North Carolina")],
            vec![
                TeamAlias {
                    alias: "blue".to_string(),
                    source: Some("x".to_string()),
                    team_id: 1,
                },
                TeamAlias {
                    alias: "blue".to_string(),
                    source: Some("x".to_string()),
                    team_id: 2,
                },
            ],
            vec![],
        );
        assert!(err.is_err());
    }

    #[test]
    fn leading_st_expands_to_state() {
        assert_eq!(normalize_name("St Bonaventure"), "state bonaventure");
        assert_eq!(normalize_name("NC State"), "north carolina state");
    }
}
