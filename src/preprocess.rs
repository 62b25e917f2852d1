// Feature engineering: derived on-base and baserunning stats plus the strikeout cohort.
use std::fmt;
use std::str::FromStr;

use log::info;

use crate::io::RawRecord;

/// 162 games × 27 outs: fixed plate-appearance normalizer.
pub const PA_NORMALIZER: f64 = 4374.0;

/// Slope applied to pitching strikeouts before comparing with batting strikeouts.
const STRIKEOUT_SLOPE: f64 = 0.96;

/// Strikeout cohort of a team-season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StrikeoutGroup {
    High,
    MedHigh,
    MedLow,
    Low,
}

impl StrikeoutGroup {
    pub const ALL: [StrikeoutGroup; 4] = [
        StrikeoutGroup::High,
        StrikeoutGroup::MedHigh,
        StrikeoutGroup::MedLow,
        StrikeoutGroup::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrikeoutGroup::High => "high",
            StrikeoutGroup::MedHigh => "med_high",
            StrikeoutGroup::MedLow => "med_low",
            StrikeoutGroup::Low => "low",
        }
    }
}

impl fmt::Display for StrikeoutGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrikeoutGroup {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(StrikeoutGroup::High),
            "med_high" => Ok(StrikeoutGroup::MedHigh),
            "med_low" => Ok(StrikeoutGroup::MedLow),
            "low" => Ok(StrikeoutGroup::Low),
            _ => Err(format!("Unknown strikeout group: {}", s)),
        }
    }
}

/// Evaluated top to bottom; the first rule whose threshold
/// `0.96 × pitching_so + offset` is met wins. Anything below every rule is `Low`.
const STRIKEOUT_RULES: [(StrikeoutGroup, f64); 3] = [
    (StrikeoutGroup::High, 10.0),
    (StrikeoutGroup::MedHigh, -50.0),
    (StrikeoutGroup::MedLow, -120.0),
];

/// Assign the strikeout cohort. Equality with a threshold resolves to the higher band.
pub fn strikeout_group(batting_so: f64, pitching_so: f64) -> Option<StrikeoutGroup> {
    if !batting_so.is_finite() || !pitching_so.is_finite() {
        return None;
    }
    let base = STRIKEOUT_SLOPE * pitching_so;
    let group = STRIKEOUT_RULES
        .iter()
        .find(|&&(_, offset)| batting_so >= base + offset)
        .map(|&(group, _)| group)
        .unwrap_or(StrikeoutGroup::Low);
    Some(group)
}

/// Engineered team-season: surviving raw predictors, derived features, cohort and target.
/// `None` marks a cell the imputer has to fill.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamSeason {
    pub index: Option<f64>,
    pub wins: Option<f64>,
    pub batting_2b: Option<f64>,
    pub batting_3b: Option<f64>,
    pub batting_hr: Option<f64>,
    pub batting_so: Option<f64>,
    pub pitching_so: Option<f64>,
    pub fielding_e: Option<f64>,
    pub net_stolen_bases: Option<f64>,
    pub offense_obp: Option<f64>,
    pub defense_obp: Option<f64>,
    pub total_at_bats: Option<f64>,
    pub strikeout_group: Option<StrikeoutGroup>,
}

impl TeamSeason {
    /// Re-derive the cohort from the current strikeout columns.
    pub fn derive_group(&self) -> Option<StrikeoutGroup> {
        strikeout_group(self.batting_so?, self.pitching_so?)
    }
}

/// Numeric predictor columns of a `TeamSeason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Batting2b,
    Batting3b,
    BattingHr,
    BattingSo,
    PitchingSo,
    FieldingE,
    NetStolenBases,
    OffenseObp,
    DefenseObp,
    TotalAtBats,
}

impl Feature {
    pub const ALL: [Feature; 10] = [
        Feature::Batting2b,
        Feature::Batting3b,
        Feature::BattingHr,
        Feature::BattingSo,
        Feature::PitchingSo,
        Feature::FieldingE,
        Feature::NetStolenBases,
        Feature::OffenseObp,
        Feature::DefenseObp,
        Feature::TotalAtBats,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::Batting2b => "batting_2b",
            Feature::Batting3b => "batting_3b",
            Feature::BattingHr => "batting_hr",
            Feature::BattingSo => "batting_so",
            Feature::PitchingSo => "pitching_so",
            Feature::FieldingE => "fielding_e",
            Feature::NetStolenBases => "net_stolen_bases",
            Feature::OffenseObp => "offense_obp",
            Feature::DefenseObp => "defense_obp",
            Feature::TotalAtBats => "total_at_bats",
        }
    }

    pub fn get(&self, r: &TeamSeason) -> Option<f64> {
        match self {
            Feature::Batting2b => r.batting_2b,
            Feature::Batting3b => r.batting_3b,
            Feature::BattingHr => r.batting_hr,
            Feature::BattingSo => r.batting_so,
            Feature::PitchingSo => r.pitching_so,
            Feature::FieldingE => r.fielding_e,
            Feature::NetStolenBases => r.net_stolen_bases,
            Feature::OffenseObp => r.offense_obp,
            Feature::DefenseObp => r.defense_obp,
            Feature::TotalAtBats => r.total_at_bats,
        }
    }

    pub fn set(&self, r: &mut TeamSeason, v: Option<f64>) {
        let slot = match self {
            Feature::Batting2b => &mut r.batting_2b,
            Feature::Batting3b => &mut r.batting_3b,
            Feature::BattingHr => &mut r.batting_hr,
            Feature::BattingSo => &mut r.batting_so,
            Feature::PitchingSo => &mut r.pitching_so,
            Feature::FieldingE => &mut r.fielding_e,
            Feature::NetStolenBases => &mut r.net_stolen_bases,
            Feature::OffenseObp => &mut r.offense_obp,
            Feature::DefenseObp => &mut r.defense_obp,
            Feature::TotalAtBats => &mut r.total_at_bats,
        };
        *slot = v;
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// `num / (num + offset)`, missing when the denominator is zero or not finite.
fn on_base_ratio(num: f64, den: f64) -> Option<f64> {
    if den == 0.0 || !den.is_finite() {
        return None;
    }
    finite(num / den)
}

fn offense_obp(r: &RawRecord) -> Option<f64> {
    let reached = r.batting_h? + r.batting_bb?;
    on_base_ratio(reached, reached - r.baserun_cs? + PA_NORMALIZER)
}

fn defense_obp(r: &RawRecord) -> Option<f64> {
    let allowed = r.pitching_h? + r.fielding_e? + r.pitching_bb? - r.fielding_dp?;
    on_base_ratio(allowed, allowed + PA_NORMALIZER)
}

fn total_at_bats(r: &RawRecord) -> Option<f64> {
    finite(r.batting_h? + r.batting_bb? - r.baserun_cs? + PA_NORMALIZER)
}

/// Derive one engineered row. Never fails: an underivable cell is left missing.
pub fn engineer(r: &RawRecord) -> TeamSeason {
    let mut row = TeamSeason {
        index: r.index,
        wins: r.wins,
        batting_2b: r.batting_2b,
        batting_3b: r.batting_3b,
        batting_hr: r.batting_hr,
        batting_so: r.batting_so,
        pitching_so: r.pitching_so,
        fielding_e: r.fielding_e,
        net_stolen_bases: r.baserun_sb.zip(r.baserun_cs).and_then(|(sb, cs)| finite(sb - cs)),
        offense_obp: offense_obp(r),
        defense_obp: defense_obp(r),
        total_at_bats: total_at_bats(r),
        strikeout_group: None,
    };
    row.strikeout_group = row.derive_group();
    row
}

/// Engineer every row, keeping row order.
pub fn engineer_all(records: &[RawRecord]) -> Vec<TeamSeason> {
    let rows: Vec<TeamSeason> = records.iter().map(engineer).collect();
    let ungrouped = rows.iter().filter(|r| r.strikeout_group.is_none()).count();
    info!(
        "Engineered {} rows ({} without a strikeout group yet)",
        rows.len(),
        ungrouped
    );
    rows
}
