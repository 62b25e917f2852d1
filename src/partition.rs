// Train/test split and strikeout-cohort split.
use std::collections::BTreeMap;

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::PipelineError;
use crate::preprocess::{StrikeoutGroup, TeamSeason};

pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;

/// Randomly split rows into train and test; train holds `round(train_fraction × n)` rows.
/// Each part keeps the original row order. Same seed, same split.
pub fn split(
    rows: &[TeamSeason],
    train_fraction: f64,
    seed: u64,
) -> Result<(Vec<TeamSeason>, Vec<TeamSeason>), PipelineError> {
    if !(0.0..=1.0).contains(&train_fraction) {
        return Err(PipelineError::InvalidFraction(train_fraction));
    }
    let n = rows.len();
    let n_train = (train_fraction * n as f64).round() as usize;

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let mut in_train = vec![false; n];
    for &i in &order[..n_train] {
        in_train[i] = true;
    }

    let (train, test): (Vec<_>, Vec<_>) = rows
        .iter()
        .zip(&in_train)
        .partition(|&(_, &t)| t);
    let train: Vec<TeamSeason> = train.into_iter().map(|(r, _)| r.clone()).collect();
    let test: Vec<TeamSeason> = test.into_iter().map(|(r, _)| r.clone()).collect();
    info!("Split {} rows into {} train / {} test", n, train.len(), test.len());
    Ok((train, test))
}

/// Partition rows by strikeout cohort. Every row lands in exactly one group.
pub fn group_split(
    rows: &[TeamSeason],
) -> Result<BTreeMap<StrikeoutGroup, Vec<TeamSeason>>, PipelineError> {
    let mut groups: BTreeMap<StrikeoutGroup, Vec<TeamSeason>> = BTreeMap::new();
    for (i, r) in rows.iter().enumerate() {
        let g = r.strikeout_group.ok_or(PipelineError::MissingGroup(i))?;
        groups.entry(g).or_default().push(r.clone());
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<TeamSeason> {
        (0..n)
            .map(|i| TeamSeason {
                index: Some(i as f64),
                strikeout_group: Some(StrikeoutGroup::ALL[i % 4]),
                ..TeamSeason::default()
            })
            .collect()
    }

    fn ids(rows: &[TeamSeason]) -> Vec<usize> {
        rows.iter().map(|r| r.index.unwrap() as usize).collect()
    }

    #[test]
    fn split_is_a_strict_partition() {
        let data = rows(101);
        let (train, test) = split(&data, 0.8, 42).unwrap();
        assert_eq!(train.len(), 81);
        assert_eq!(test.len(), 20);
        let mut all = ids(&train);
        all.extend(ids(&test));
        all.sort_unstable();
        assert_eq!(all, (0..101).collect::<Vec<_>>());
    }

    #[test]
    fn split_keeps_row_order_within_parts() {
        let (train, test) = split(&rows(50), 0.8, 1).unwrap();
        assert!(ids(&train).windows(2).all(|w| w[0] < w[1]));
        assert!(ids(&test).windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn split_is_seeded() {
        let data = rows(60);
        let a = split(&data, 0.8, 9).unwrap();
        let b = split(&data, 0.8, 9).unwrap();
        assert_eq!(ids(&a.0), ids(&b.0));
        let c = split(&data, 0.8, 10).unwrap();
        assert_ne!(ids(&a.0), ids(&c.0));
    }

    #[test]
    fn split_edges() {
        let data = rows(10);
        assert_eq!(split(&data, 0.0, 1).unwrap().0.len(), 0);
        assert_eq!(split(&data, 1.0, 1).unwrap().1.len(), 0);
        assert!(split(&data, 1.5, 1).is_err());
        assert!(split(&[], 0.8, 1).unwrap().0.is_empty());
    }

    #[test]
    fn group_split_covers_every_row_once() {
        let data = rows(22);
        let groups = group_split(&data).unwrap();
        assert_eq!(groups.len(), 4);
        assert_eq!(groups.values().map(Vec::len).sum::<usize>(), 22);
        for (g, members) in &groups {
            assert!(members.iter().all(|r| r.strikeout_group == Some(*g)));
        }
        assert_eq!(groups[&StrikeoutGroup::High].len(), 6);
    }

    #[test]
    fn group_split_rejects_ungrouped_rows() {
        let mut data = rows(5);
        data[3].strikeout_group = None;
        assert!(matches!(group_split(&data), Err(PipelineError::MissingGroup(3))));
    }
}
