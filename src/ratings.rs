use anyhow::{anyhow, Result};

use crate::entities::RatingSnapshot;
use crate::store::CanonicalSnapshot;

/// Point-in-time rating lookup for a season-S game: always season S-1.
///
/// End-of-season ratings contain the whole season's games, so handing a
/// same-season snapshot to a mid-season prediction is look-ahead. This
/// function is the single place that rule lives; callers never pick the
/// season themselves. Absent data is a loud error -- no current-season
/// fallback, no league average.
pub fn ratings_for_game(
    snap: &CanonicalSnapshot,
    team_id: u32,
    game_season: i32,
) -> Result<&RatingSnapshot> {
    let wanted = game_season - 1;
    snap.ratings.get(&(team_id, wanted)).ok_or_else(|| {
        anyhow!(
            "no season {wanted} rating snapshot for team {team_id} \
             (required for a season {game_season} game)"
        )
    })
}
