//! Slot allocation across runner sets
//!
//! Pure functions from `(runner sets, available capacity)` to per-set slot
//! counts; no I/O and no floating point. Two algorithms are provided:
//!
//! - **Strict priority**: highest priority first, each set takes what fits
//!   in the capacity the sets before it left behind.
//! - **Weighted fair share**: capacity is split proportionally to priority
//!   weights, then leftover capacity is redistributed in priority order.
//!
//! Both honor the same envelope: `min_runners` is a guarantee and wins even
//! over a configured cap or exhausted capacity (the cluster is deliberately
//! over-committed to keep the guarantee), while `configured_max` caps every
//! capacity-derived count. Ties are broken by name for determinism.

use clap::ValueEnum;
use tracing::debug;

use super::resources::RunnerSetResources;

/// Which allocation algorithm the reconciler runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum AllocatorStrategy {
    /// Highest priority first; each set takes what fits in what remains
    Strict,
    /// Priority-weighted proportional shares with leftover redistribution
    #[default]
    FairShare,
}

impl std::fmt::Display for AllocatorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::FairShare => f.write_str("fair-share"),
        }
    }
}

/// Calculated slot count for one runner set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Runner set name
    pub name: String,
    /// New `maxRunners` value, before the safety floor
    pub max_runners: i32,
}

/// Allocate slots to every runner set under the given available capacity
///
/// Output order follows `(priority DESC, name ASC)` and is deterministic for
/// identical inputs.
pub fn allocate(
    strategy: AllocatorStrategy,
    sets: &[RunnerSetResources],
    available_cpu_millis: i64,
    available_memory_bytes: i64,
) -> Vec<Allocation> {
    match strategy {
        AllocatorStrategy::Strict => {
            allocate_strict(sets, available_cpu_millis, available_memory_bytes)
        }
        AllocatorStrategy::FairShare => {
            allocate_fair_share(sets, available_cpu_millis, available_memory_bytes)
        }
    }
}

/// How many runners of this spec fit into the given capacity
///
/// Truncating division on the most constrained resource; negative
/// availability behaves as zero, as does a non-positive per-runner cost.
fn fit(rs: &RunnerSetResources, cpu_millis: i64, memory_bytes: i64) -> i64 {
    if rs.cpu_millis <= 0 || rs.memory_bytes <= 0 {
        return 0;
    }
    (cpu_millis / rs.cpu_millis)
        .min(memory_bytes / rs.memory_bytes)
        .max(0)
}

/// Sets ordered by `(priority DESC, name ASC)`
fn sorted_by_priority(sets: &[RunnerSetResources]) -> Vec<&RunnerSetResources> {
    let mut sorted: Vec<&RunnerSetResources> = sets.iter().collect();
    sorted.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
    sorted
}

/// Apply the configured cap, then the minimum guarantee
///
/// The cap bounds the capacity-derived count; the minimum is enforced last
/// so a `min_runners` above the cap (or above remaining capacity) still
/// holds.
fn cap_and_floor(rs: &RunnerSetResources, slots: i64) -> i64 {
    let mut slots = slots;
    if rs.configured_max > 0 {
        slots = slots.min(i64::from(rs.configured_max));
    }
    slots.max(i64::from(rs.min_runners))
}

fn clamp_slots(slots: i64) -> i32 {
    slots.min(i64::from(i32::MAX)) as i32
}

/// Strict-priority allocation
///
/// Walks sets in priority order carrying the remaining capacity. The
/// remainder is allowed to go negative (minimums over-commit); later sets
/// then see zero through the clamp in [`fit`].
fn allocate_strict(
    sets: &[RunnerSetResources],
    available_cpu_millis: i64,
    available_memory_bytes: i64,
) -> Vec<Allocation> {
    let mut remaining_cpu = available_cpu_millis;
    let mut remaining_memory = available_memory_bytes;
    let mut allocations = Vec::with_capacity(sets.len());

    debug!(
        available_cpu_millis,
        available_memory_bytes,
        runner_sets = sets.len(),
        "starting strict allocation"
    );

    for rs in sorted_by_priority(sets) {
        let slots = cap_and_floor(rs, fit(rs, remaining_cpu, remaining_memory));

        remaining_cpu -= slots * rs.cpu_millis;
        remaining_memory -= slots * rs.memory_bytes;

        debug!(
            name = %rs.name,
            priority = rs.priority,
            slots,
            remaining_cpu_millis = remaining_cpu,
            remaining_memory_bytes = remaining_memory,
            "allocated runner set"
        );

        allocations.push(Allocation {
            name: rs.name.clone(),
            max_runners: clamp_slots(slots),
        });
    }

    allocations
}

/// Weighted fair share with redistribution
///
/// First pass gives each set `fit` of its proportional capacity share,
/// capped. Second pass raises sets to their minimum guarantee. Third pass
/// hands whatever is left to sets below their cap, in priority order, in a
/// single sweep.
fn allocate_fair_share(
    sets: &[RunnerSetResources],
    available_cpu_millis: i64,
    available_memory_bytes: i64,
) -> Vec<Allocation> {
    let sorted = sorted_by_priority(sets);
    let total_weight: i64 = sorted.iter().map(|rs| weight(rs)).sum();
    if total_weight == 0 {
        return Vec::new();
    }

    debug!(
        available_cpu_millis,
        available_memory_bytes,
        runner_sets = sets.len(),
        total_weight,
        "starting fair-share allocation"
    );

    // First pass: proportional shares, capped. Second pass folded in via
    // cap_and_floor: minimums override both the share and the cap.
    let mut slots_by_set: Vec<(&RunnerSetResources, i64)> = sorted
        .iter()
        .map(|rs| {
            let w = weight(rs);
            // Widened so a large priority times a large cluster cannot wrap
            let cpu_share =
                (i128::from(available_cpu_millis) * i128::from(w) / i128::from(total_weight)) as i64;
            let memory_share = (i128::from(available_memory_bytes) * i128::from(w)
                / i128::from(total_weight)) as i64;
            let slots = cap_and_floor(rs, fit(rs, cpu_share, memory_share));
            debug!(
                name = %rs.name,
                weight = w,
                cpu_share_millis = cpu_share,
                memory_share_bytes = memory_share,
                slots,
                "fair share computed"
            );
            (*rs, slots)
        })
        .collect();

    // Redistribution: a single sweep in priority order over sets that still
    // have headroom under their cap.
    let consumed_cpu: i64 = slots_by_set.iter().map(|(rs, s)| s * rs.cpu_millis).sum();
    let consumed_memory: i64 = slots_by_set
        .iter()
        .map(|(rs, s)| s * rs.memory_bytes)
        .sum();
    let mut remaining_cpu = available_cpu_millis - consumed_cpu;
    let mut remaining_memory = available_memory_bytes - consumed_memory;

    if remaining_cpu > 0 || remaining_memory > 0 {
        for (rs, slots) in &mut slots_by_set {
            let mut addable = fit(rs, remaining_cpu, remaining_memory);
            if rs.configured_max > 0 {
                addable = addable.min((i64::from(rs.configured_max) - *slots).max(0));
            }
            if addable > 0 {
                *slots += addable;
                remaining_cpu -= addable * rs.cpu_millis;
                remaining_memory -= addable * rs.memory_bytes;
                debug!(
                    name = %rs.name,
                    added = addable,
                    slots = *slots,
                    remaining_cpu_millis = remaining_cpu,
                    remaining_memory_bytes = remaining_memory,
                    "redistributed leftover capacity"
                );
            }
        }
    }

    slots_by_set
        .into_iter()
        .map(|(rs, slots)| Allocation {
            name: rs.name.clone(),
            max_runners: clamp_slots(slots),
        })
        .collect()
}

/// Effective fair-share weight: priorities at or below zero weigh 1
fn weight(rs: &RunnerSetResources) -> i64 {
    i64::from(rs.priority.max(1))
}
