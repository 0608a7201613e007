//! Retention engine
//!
//! Pure selection of the archives a rotation deletes. Nothing here touches
//! storage: the catalog removes whatever [`select_for_deletion`] returns.
//!
//! Tiered classification walks archives newest first and assigns each to the
//! first tier that matches:
//!
//! - **daily**: `age_days == 0` or `age_days < daily`, always kept
//! - **weekly**: `age_days <= daily + weekly * 7`, one archive per
//!   `age_days / 7` bucket
//! - **monthly**: older, one archive per `age_days / 30` bucket, at most
//!   `monthly` buckets
//!
//! Every kept archive occupies its week and month bucket, so a later archive
//! in a bucket already represented by a newer tier is a duplicate. Archives
//! past the last monthly bucket stay unclassified and are the only candidates
//! for the `max_backups` floor; duplicates and archives with an unparseable
//! `created_at` are always deleted.

use super::types::{ArchiveRecord, RetentionPolicy, TieredRetention};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Delete,
    Unclassified,
}

/// Order archives newest first by `created_at`, ties by filename descending.
///
/// Archives whose `created_at` does not parse sort last.
pub fn sort_newest_first(records: &mut [ArchiveRecord]) {
    records.sort_by_cached_key(|r| Reverse((r.created_at(), r.filename.clone())));
}

/// Filenames to delete so that `records` conforms to `policy` at `now`.
pub fn select_for_deletion(
    records: &[ArchiveRecord],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> BTreeSet<String> {
    let mut ordered = records.to_vec();
    sort_newest_first(&mut ordered);

    let verdicts = match policy {
        RetentionPolicy::Simple { max_backups } => ordered
            .iter()
            .enumerate()
            .map(|(i, _)| if i < *max_backups { Verdict::Keep } else { Verdict::Delete })
            .collect(),
        RetentionPolicy::Tiered { max_backups, tiers } => {
            let mut verdicts = classify_tiered(&ordered, tiers, now);
            backfill(&mut verdicts, *max_backups);
            verdicts
        }
    };

    ordered
        .into_iter()
        .zip(verdicts)
        .filter(|(_, verdict)| *verdict != Verdict::Keep)
        .map(|(record, _)| record.filename)
        .collect()
}

fn classify_tiered(
    ordered: &[ArchiveRecord],
    tiers: &TieredRetention,
    now: DateTime<Utc>,
) -> Vec<Verdict> {
    let daily = i64::from(tiers.daily);
    let weekly_limit = daily + i64::from(tiers.weekly) * 7;
    let mut weeks = HashSet::new();
    let mut months = HashSet::new();
    let mut monthly_buckets = 0u32;

    ordered
        .iter()
        .map(|record| {
            let Some(created) = record.created_at() else {
                warn!(filename = %record.filename, created_at = %record.created_at, "Unparseable creation time, marking for deletion");
                return Verdict::Delete;
            };
            let age_days = (now - created).num_days().max(0);
            let week = age_days / 7;
            let month = age_days / 30;

            let verdict = if age_days == 0 || age_days < daily {
                weeks.insert(week);
                months.insert(month);
                Verdict::Keep
            } else if age_days <= weekly_limit {
                if weeks.insert(week) {
                    months.insert(month);
                    Verdict::Keep
                } else {
                    Verdict::Delete
                }
            } else if months.contains(&month) {
                Verdict::Delete
            } else if monthly_buckets < tiers.monthly {
                months.insert(month);
                monthly_buckets += 1;
                Verdict::Keep
            } else {
                Verdict::Unclassified
            };

            debug!(filename = %record.filename, age_days, ?verdict, "classified backup");
            verdict
        })
        .collect()
}

fn backfill(verdicts: &mut [Verdict], floor: usize) {
    let mut kept = verdicts.iter().filter(|v| **v == Verdict::Keep).count();
    for verdict in verdicts.iter_mut() {
        if kept >= floor {
            break;
        }
        if *verdict == Verdict::Unclassified {
            *verdict = Verdict::Keep;
            kept += 1;
        }
    }
}
