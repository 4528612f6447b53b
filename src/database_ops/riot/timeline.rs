//! Decomposes one match detail document into lane-opponent [`NewMatchup`] rows.
//!
//! Participants are grouped by `(lane, role)`; only groups of exactly two
//! yield rows, one from each side's perspective. A row counts as a win when
//! its champion is the group's winning champion, i.e. the champion of the
//! last group member on the winning team. Per-participant event
//! timelines come from the raw `ITEM_PURCHASED` and `SKILL_LEVEL_UP` events in
//! frame order.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

use crate::database_ops::models::NewMatchup;

/// Match-level shape problems. The match stays unchecked when one occurs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchShapeError {
    #[error("missing or malformed `{0}`")]
    MissingField(&'static str),
    #[error("expected exactly one winning team, found {0}")]
    AmbiguousWinner(usize),
    #[error("unrecognised patch version `{0}`")]
    BadPatch(String),
}

/// `"7.14.203.1234"` → `"7.14"`. Already-short versions are kept when numeric.
pub fn patch_family(version: &str) -> Option<String> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?;
    let minor = parts.next()?;
    if major.is_empty()
        || minor.is_empty()
        || !major.bytes().all(|b| b.is_ascii_digit())
        || !minor.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some(format!("{major}.{minor}"))
}

#[derive(Debug, Default, PartialEq)]
pub struct EventTimelines {
    pub items: HashMap<i64, Vec<i32>>,
    pub skills: HashMap<i64, Vec<i32>>,
}

/// Walks `timeline.frames[].events[]`, keeping event order. Events missing
/// their participant or payload id are ignored.
pub fn collect_timelines(frames: &[Value]) -> EventTimelines {
    let mut out = EventTimelines::default();
    let events = frames
        .iter()
        .filter_map(|f| f.get("events").and_then(Value::as_array))
        .flatten();
    for ev in events {
        let Some(pid) = ev.get("participantId").and_then(Value::as_i64) else {
            continue;
        };
        match ev.get("eventType").and_then(Value::as_str) {
            Some("ITEM_PURCHASED") => {
                if let Some(item) = ev.get("itemId").and_then(as_i32) {
                    out.items.entry(pid).or_default().push(item);
                }
            }
            Some("SKILL_LEVEL_UP") => {
                if let Some(slot) = ev.get("skillSlot").and_then(as_i32) {
                    out.skills.entry(pid).or_default().push(slot);
                }
            }
            _ => {}
        }
    }
    out
}

/// The single team flagged `winner`.
pub fn winning_team(teams: &[Value]) -> Result<i64, MatchShapeError> {
    let winners: Vec<i64> = teams
        .iter()
        .filter(|t| t.get("winner").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|t| t.get("teamId").and_then(Value::as_i64))
        .collect();
    match winners.as_slice() {
        [team] => Ok(*team),
        other => Err(MatchShapeError::AmbiguousWinner(other.len())),
    }
}

struct Seat<'a> {
    participant_id: i64,
    team_id: i64,
    champion_id: i64,
    raw: &'a Value,
}

/// Fields shared by every row of one match.
struct MatchContext<'a> {
    match_id: i64,
    duration: i64,
    patch: String,
    winner: i64,
    timelines: &'a EventTimelines,
}

pub fn extract_matchups(match_id: i64, detail: &Value) -> Result<Vec<NewMatchup>, MatchShapeError> {
    let duration = detail
        .get("matchDuration")
        .and_then(Value::as_i64)
        .ok_or(MatchShapeError::MissingField("matchDuration"))?;
    let version = detail
        .get("matchVersion")
        .and_then(Value::as_str)
        .ok_or(MatchShapeError::MissingField("matchVersion"))?;
    let patch = patch_family(version).ok_or_else(|| MatchShapeError::BadPatch(version.into()))?;
    let teams = detail
        .get("teams")
        .and_then(Value::as_array)
        .ok_or(MatchShapeError::MissingField("teams"))?;
    let winner = winning_team(teams)?;
    let participants = detail
        .get("participants")
        .and_then(Value::as_array)
        .ok_or(MatchShapeError::MissingField("participants"))?;
    let frames = detail
        .get("timeline")
        .and_then(|t| t.get("frames"))
        .and_then(Value::as_array)
        .ok_or(MatchShapeError::MissingField("timeline.frames"))?;

    let timelines = collect_timelines(frames);
    let ctx = MatchContext {
        match_id,
        duration,
        patch,
        winner,
        timelines: &timelines,
    };

    let mut groups: BTreeMap<(String, String), Vec<Seat<'_>>> = BTreeMap::new();
    for p in participants {
        match seat(p) {
            Some((key, s)) => groups.entry(key).or_default().push(s),
            None => debug!(match_id, "participant without lane/role/ids; not grouped"),
        }
    }

    let mut rows = Vec::new();
    for ((lane, role), seats) in &groups {
        let [a, b] = seats.as_slice() else {
            debug!(match_id, %lane, %role, size = seats.len(), "lane group is not a 1v1");
            continue;
        };
        let group_winner = seats
            .iter()
            .rev()
            .find(|s| s.team_id == ctx.winner)
            .map(|s| s.champion_id);
        for (me, enemy) in [(a, b), (b, a)] {
            match build_row(&ctx, me, enemy, group_winner) {
                Some(row) => rows.push(row),
                None => debug!(
                    match_id,
                    participant = me.participant_id,
                    "participant missing stats or loadout; row skipped"
                ),
            }
        }
    }
    Ok(rows)
}

fn seat(p: &Value) -> Option<((String, String), Seat<'_>)> {
    let tl = p.get("timeline")?;
    let lane = tl.get("lane")?.as_str()?.to_string();
    let role = tl.get("role")?.as_str()?.to_string();
    let s = Seat {
        participant_id: p.get("participantId")?.as_i64()?,
        team_id: p.get("teamId")?.as_i64()?,
        champion_id: p.get("championId")?.as_i64()?,
        raw: p,
    };
    Some(((lane, role), s))
}

fn build_row(
    ctx: &MatchContext<'_>,
    me: &Seat<'_>,
    enemy: &Seat<'_>,
    group_winner: Option<i64>,
) -> Option<NewMatchup> {
    let stats = me.raw.get("stats")?;
    let stat = |key: &str| stats.get(key).and_then(as_i32);
    let spell1 = me.raw.get("spell1Id")?.as_i64()?;
    let spell2 = me.raw.get("spell2Id")?.as_i64()?;

    Some(NewMatchup {
        match_id: ctx.match_id,
        champion: me.champion_id,
        enemy: enemy.champion_id,
        won: group_winner == Some(me.champion_id),
        kills: stat("kills")?,
        deaths: stat("deaths")?,
        assists: stat("assists")?,
        creep_score: stat("minionsKilled")?,
        damage_dealt: stats.get("totalDamageDealtToChampions")?.as_f64()?,
        duration: ctx.duration,
        masteries: loadout(me.raw, "masteries", "masteryId")?,
        runes: loadout(me.raw, "runes", "runeId")?,
        summoners: format!("{spell1},{spell2}"),
        patch_version: ctx.patch.clone(),
        item_timeline: ctx
            .timelines
            .items
            .get(&me.participant_id)
            .cloned()
            .unwrap_or_default(),
        skill_timeline: ctx
            .timelines
            .skills
            .get(&me.participant_id)
            .cloned()
            .unwrap_or_default(),
    })
}

/// `[{"masteryId": 6111, "rank": 5}]` → `["6111:5"]`.
fn loadout(raw: &Value, field: &str, id_key: &str) -> Option<Vec<String>> {
    raw.get(field)?
        .as_array()?
        .iter()
        .map(|e| {
            let id = e.get(id_key)?.as_i64()?;
            let rank = e.get("rank")?.as_i64()?;
            Some(format!("{id}:{rank}"))
        })
        .collect()
}

fn as_i32(v: &Value) -> Option<i32> {
    v.as_i64().and_then(|n| i32::try_from(n).ok())
}


#[cfg(test)]
mod tests {
    use super::fixtures::{detail, participant, standard_detail};
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_family_truncates_to_two_components() {
        assert_eq!(patch_family("7.14.203.1234").as_deref(), Some("7.14"));
        assert_eq!(patch_family("7.14").as_deref(), Some("7.14"));
        assert_eq!(patch_family("7"), None);
        assert_eq!(patch_family("x.y.z"), None);
    }

    #[test]
    fn pair_yields_mirrored_rows() {
        let rows = extract_matchups(9, &standard_detail()).unwrap();
        assert_eq!(rows.len(), 4);

        let top: Vec<_> = rows.iter().filter(|r| r.champion == 10 || r.champion == 60).collect();
        assert_eq!(top.len(), 2);
        let ten = top.iter().find(|r| r.champion == 10).unwrap();
        let sixty = top.iter().find(|r| r.champion == 60).unwrap();
        assert_eq!(ten.enemy, 60);
        assert_eq!(sixty.enemy, 10);
        assert!(ten.won);
        assert!(!sixty.won);
        assert_eq!(ten.patch_version, "7.14");
        assert_eq!(ten.summoners, "4,14");
        assert_eq!(ten.masteries, vec!["6111:5", "6362:1"]);
        assert_eq!(ten.runes, vec!["5245:9"]);
        assert_eq!(ten.match_id, 9);
        assert_eq!(ten.item_timeline, vec![1055]);
        assert_eq!(ten.skill_timeline, vec![1]);
        assert_eq!(sixty.item_timeline, vec![1054]);
        assert!(sixty.skill_timeline.is_empty());
    }

    #[test]
    fn group_of_three_is_skipped() {
        let d = detail(
            vec![
                participant(3, 100, 30, "BOTTOM", "DUO_CARRY"),
                participant(8, 200, 80, "BOTTOM", "DUO_CARRY"),
                participant(9, 200, 90, "BOTTOM", "DUO_CARRY"),
                participant(1, 100, 10, "TOP", "SOLO"),
                participant(6, 200, 60, "TOP", "SOLO"),
            ],
            vec![],
            200,
        );
        let rows = extract_matchups(1, &d).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.champion == 10 || r.champion == 60));
    }

    fn wins(rows: &[NewMatchup]) -> Vec<(i64, bool)> {
        let mut out: Vec<_> = rows.iter().map(|r| (r.champion, r.won)).collect();
        out.sort();
        out
    }

    #[test]
    fn mirror_matchup_marks_both_rows_won() {
        let d = detail(
            vec![
                participant(1, 100, 10, "TOP", "SOLO"),
                participant(6, 200, 10, "TOP", "SOLO"),
            ],
            vec![],
            200,
        );
        let rows = extract_matchups(1, &d).unwrap();
        assert_eq!(wins(&rows), vec![(10, true), (10, true)]);
    }

    #[test]
    fn same_team_pair_credits_last_winning_seat() {
        let d = detail(
            vec![
                participant(1, 100, 10, "TOP", "SOLO"),
                participant(2, 100, 20, "TOP", "SOLO"),
            ],
            vec![],
            100,
        );
        let rows = extract_matchups(1, &d).unwrap();
        assert_eq!(wins(&rows), vec![(10, false), (20, true)]);
    }

    #[test]
    fn pair_on_losing_team_has_no_winner() {
        let d = detail(
            vec![
                participant(1, 100, 10, "TOP", "SOLO"),
                participant(2, 100, 20, "TOP", "SOLO"),
            ],
            vec![],
            200,
        );
        let rows = extract_matchups(1, &d).unwrap();
        assert_eq!(wins(&rows), vec![(10, false), (20, false)]);
    }

    #[test]
    fn missing_stats_skip_only_that_row() {
        let mut broken = participant(6, 200, 60, "TOP", "SOLO");
        broken["stats"].as_object_mut().unwrap().remove("kills");
        let d = detail(vec![participant(1, 100, 10, "TOP", "SOLO"), broken], vec![], 100);
        let rows = extract_matchups(1, &d).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].champion, 10);
        assert_eq!(rows[0].enemy, 60);
    }

    #[test]
    fn winner_must_be_unique() {
        let mut none = standard_detail();
        none["teams"][0]["winner"] = json!(false);
        assert_eq!(
            extract_matchups(1, &none).unwrap_err(),
            MatchShapeError::AmbiguousWinner(0)
        );

        let mut both = standard_detail();
        both["teams"][1]["winner"] = json!(true);
        assert_eq!(
            extract_matchups(1, &both).unwrap_err(),
            MatchShapeError::AmbiguousWinner(2)
        );
    }

    #[test]
    fn missing_timeline_fails_the_match() {
        let mut d = standard_detail();
        d.as_object_mut().unwrap().remove("timeline");
        assert_eq!(
            extract_matchups(1, &d).unwrap_err(),
            MatchShapeError::MissingField("timeline.frames")
        );
    }

    #[test]
    fn events_keep_raw_order_across_frames() {
        let frames = vec![
            json!({"events": [
                {"eventType": "ITEM_PURCHASED", "participantId": 1, "itemId": 3},
                {"eventType": "ITEM_PURCHASED", "participantId": 1, "itemId": 1}
            ]}),
            json!({}),
            json!({"events": [
                {"eventType": "ITEM_PURCHASED", "participantId": 1, "itemId": 2},
                {"eventType": "WARD_PLACED", "participantId": 1},
                {"eventType": "SKILL_LEVEL_UP", "participantId": 1}
            ]}),
        ];
        let tl = collect_timelines(&frames);
        assert_eq!(tl.items[&1], vec![3, 1, 2]);
        assert!(tl.skills.get(&1).is_none());
    }
}
