//! Sensitivity of the ground objective to the near-field pressures.
//!
//! Each ray contributes `dJ/dp_j` for the near-field points it used.
//! Several rays can share a point, so contributions are summed per point
//! id. The sum is formed in a canonical order so the totals do not depend
//! on which worker finished first.

use rayon::prelude::*;
use serde::Serialize;

use crate::error::{BoomError, BoomResult};
use crate::signature::NearFieldSignature;
use crate::sorting::{merge_sort, quick_sort};

/// `dJ/dp` for one near-field point from one ray
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensitivityContribution {
    pub point_id: u64,
    pub value: f64,
}

/// Summed sensitivities, sorted by point id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensitivityRecord {
    pub point_ids: Vec<u64>,
    pub values: Vec<f64>,
}

impl SensitivityRecord {
    pub fn len(&self) -> usize {
        self.point_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.point_ids.is_empty()
    }

    pub fn get(&self, point_id: u64) -> Option<f64> {
        self.point_ids.binary_search(&point_id).ok().map(|i| self.values[i])
    }
}

/// Collects contributions from any number of rays in any order
#[derive(Debug, Clone, Default)]
pub struct SensitivityAggregator {
    point_ids: Vec<u64>,
    values: Vec<f64>,
}

impl SensitivityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, point_id: u64, value: f64) {
        self.point_ids.push(point_id);
        self.values.push(value);
    }

    pub fn extend<I: IntoIterator<Item = SensitivityContribution>>(&mut self, contributions: I) {
        for c in contributions {
            self.add(c.point_id, c.value);
        }
    }

    pub fn len(&self) -> usize {
        self.point_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.point_ids.is_empty()
    }

    /// Sum per point id.
    ///
    /// Contributions are ordered by value, then stably by id, so each id's
    /// values are added in ascending order whatever order they arrived in.
    pub fn finish(self) -> SensitivityRecord {
        let SensitivityAggregator { mut point_ids, mut values } = self;
        // Equal values are interchangeable, so this pass need not be stable
        quick_sort(&mut values, &mut point_ids);
        merge_sort(&mut point_ids, &mut values);

        let mut record = SensitivityRecord::default();
        for (id, value) in point_ids.into_iter().zip(values) {
            match record.point_ids.last() {
                Some(&last) if last == id => {
                    if let Some(total) = record.values.last_mut() {
                        *total += value;
                    }
                }
                _ => {
                    record.point_ids.push(id);
                    record.values.push(value);
                }
            }
        }
        record
    }
}

/// Central-difference derivative of `objective` with respect to every
/// near-field pressure, perturbing by `relative_step` times the trace peak.
pub fn near_field_sensitivities<F>(
    near_field: &NearFieldSignature,
    relative_step: f64,
    objective: F,
) -> BoomResult<Vec<SensitivityContribution>>
where
    F: Fn(&NearFieldSignature) -> BoomResult<f64> + Sync,
{
    let step = relative_step * near_field.peak_pa();
    if !(step > 0.0) {
        return Err(BoomError::Config(format!(
            "sensitivity step {step} Pa is not positive (flat near-field trace?)"
        )));
    }

    (0..near_field.len())
        .into_par_iter()
        .map(|j| {
            let mut perturbed = near_field.clone();
            perturbed.samples[j].pressure_pa += step;
            let plus = objective(&perturbed)?;
            perturbed.samples[j].pressure_pa -= 2.0 * step;
            let minus = objective(&perturbed)?;
            Ok(SensitivityContribution {
                point_id: near_field.samples[j].point_id,
                value: (plus - minus) / (2.0 * step),
            })
        })
        .collect()
}
