// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

//! Weekly/hourly activity heat map.
//!
//! The backend returns a sparse list of `{day, hour, value}` tuples. The
//! binner turns it into a dense 7×24 matrix plus a six-band colour scale
//! derived from the observed maximum.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Monday-first labels, matching backend day numbering 1..=7.
pub const DAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
pub const HOURS_PER_DAY: usize = 24;
pub const CELL_COUNT: usize = DAY_LABELS.len() * HOURS_PER_DAY;

/// Lower bound for the scale maximum so sparse data still gets usable bands.
const SCALE_FLOOR: f64 = 10.0;
const VALUE_BUCKETS: usize = 5;

const PALETTE: [&str; VALUE_BUCKETS + 1] = [
    "#eef1f5", // zero
    "#c6dbef",
    "#6baed6",
    "#fdae61",
    "#f46d43",
    "#a50026",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub day: u8,
    pub hour: u8,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorBucket {
    pub from: f64,
    pub to: f64,
    pub color: String,
    pub label: String,
}

/// One zero band followed by five value bands. Value bands are open at
/// `from` and closed at `to`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorScale {
    pub max_value: f64,
    pub buckets: Vec<ColorBucket>,
}

impl ColorScale {
    pub fn from_observed_max(observed: f64) -> Self {
        let max_value = if observed.is_finite() {
            observed.max(SCALE_FLOOR)
        } else {
            SCALE_FLOOR
        };
        let step = max_value / VALUE_BUCKETS as f64;

        let mut bounds: Vec<f64> = (1..VALUE_BUCKETS)
            .map(|i| (step * i as f64).ceil())
            .collect();
        bounds.push(max_value.ceil());

        let mut buckets = Vec::with_capacity(VALUE_BUCKETS + 1);
        buckets.push(ColorBucket {
            from: 0.0,
            to: 0.0,
            color: PALETTE[0].to_string(),
            label: "0".to_string(),
        });

        let mut from = 0.0;
        for (i, to) in bounds.into_iter().enumerate() {
            buckets.push(ColorBucket {
                from,
                to,
                color: PALETTE[i + 1].to_string(),
                label: format!("({}, {}]", from, to),
            });
            from = to;
        }

        Self { max_value, buckets }
    }

    /// Index into `buckets` for a cell value.
    pub fn bucket_for(&self, value: f64) -> usize {
        if value <= 0.0 || value.is_nan() {
            return 0;
        }
        self.buckets
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, bucket)| value <= bucket.to)
            .map(|(i, _)| i)
            .unwrap_or(self.buckets.len() - 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayRow {
    pub day: u8,
    pub label: &'static str,
    pub values: [f64; HOURS_PER_DAY],
}

/// A render-ready cell: row index is the position in the (reversed) row list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderCell {
    pub row: usize,
    pub day_label: &'static str,
    pub hour: u8,
    pub value: f64,
    pub bucket: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapChart {
    /// Rows ordered bottom-to-top for the renderer: Sunday first, Monday last.
    pub rows: Vec<DayRow>,
    pub scale: ColorScale,
    /// Number of grid slots filled from the source. Zero means "no data",
    /// which is rendered differently from a matrix of zeros.
    pub source_cells: usize,
}

impl HeatmapChart {
    pub fn is_empty(&self) -> bool {
        self.source_cells == 0
    }

    pub fn value_at(&self, day: u8, hour: u8) -> Option<f64> {
        self.rows
            .iter()
            .find(|row| row.day == day)
            .and_then(|row| row.values.get(hour as usize).copied())
    }

    pub fn cells(&self) -> impl Iterator<Item = RenderCell> + '_ {
        self.rows.iter().enumerate().flat_map(move |(row_idx, row)| {
            row.values
                .iter()
                .enumerate()
                .map(move |(hour, &value)| RenderCell {
                    row: row_idx,
                    day_label: row.label,
                    hour: hour as u8,
                    value,
                    bucket: self.scale.bucket_for(value),
                })
        })
    }
}

pub struct HeatmapBinner;

impl HeatmapBinner {
    pub fn bin(source: &[HeatmapCell]) -> HeatmapChart {
        let mut grid: [[Option<f64>; HOURS_PER_DAY]; 7] = [[None; HOURS_PER_DAY]; 7];
        let mut dropped = 0usize;
        let mut kept = 0usize;
        let mut observed_max = 0.0f64;

        for cell in source {
            let day_idx = match cell.day {
                1..=7 => (cell.day - 1) as usize,
                _ => {
                    dropped += 1;
                    continue;
                }
            };
            let hour_idx = cell.hour as usize;
            if hour_idx >= HOURS_PER_DAY {
                dropped += 1;
                continue;
            }

            let value = if cell.value.is_finite() {
                cell.value.max(0.0)
            } else {
                0.0
            };
            // First tuple for a slot wins, later duplicates are ignored.
            let slot = &mut grid[day_idx][hour_idx];
            if slot.is_none() {
                *slot = Some(value);
                kept += 1;
                observed_max = observed_max.max(value);
            }
        }

        if dropped > 0 {
            warn!(
                "Dropped heat map tuples outside the 1..=7 x 0..=23 grid — dropped={} total={}",
                dropped,
                source.len()
            );
        }

        let scale = ColorScale::from_observed_max(observed_max);

        let mut rows: Vec<DayRow> = DAY_LABELS
            .iter()
            .enumerate()
            .map(|(idx, label)| {
                let mut values = [0.0; HOURS_PER_DAY];
                for (hour, value) in values.iter_mut().enumerate() {
                    *value = grid[idx][hour].unwrap_or(0.0);
                }
                DayRow {
                    day: idx as u8 + 1,
                    label: *label,
                    values,
                }
            })
            .collect();
        rows.reverse();

        debug!(
            "Binned heat map — source={} max={} top_bound={}",
            source.len(),
            scale.max_value,
            scale.buckets.last().map(|b| b.to).unwrap_or_default()
        );

        HeatmapChart {
            rows,
            scale,
            source_cells: kept,
        }
    }
}
