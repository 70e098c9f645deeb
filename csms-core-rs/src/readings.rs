//! Instant electrical readings (watts, amps, volts) per phase

use serde::{Deserialize, Serialize};

use crate::types::PhaseSlot;

/// A quantity sampled per phase
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dc: Option<f64>,
}

impl PhaseValues {
    pub fn get(&self, slot: PhaseSlot) -> Option<f64> {
        match slot {
            PhaseSlot::Total => self.total,
            PhaseSlot::L1 => self.l1,
            PhaseSlot::L2 => self.l2,
            PhaseSlot::L3 => self.l3,
            PhaseSlot::Dc => self.dc,
        }
    }

    pub fn set(&mut self, slot: PhaseSlot, value: f64) {
        let field = match slot {
            PhaseSlot::Total => &mut self.total,
            PhaseSlot::L1 => &mut self.l1,
            PhaseSlot::L2 => &mut self.l2,
            PhaseSlot::L3 => &mut self.l3,
            PhaseSlot::Dc => &mut self.dc,
        };
        *field = Some(value);
    }

    /// Per-phase values that were reported
    pub fn phases(&self) -> [Option<f64>; 3] {
        [self.l1, self.l2, self.l3]
    }

    pub fn has_phases(&self) -> bool {
        self.phases().iter().any(Option::is_some)
    }

    /// Sum of the reported per-phase values
    pub fn phase_sum(&self) -> Option<f64> {
        if !self.has_phases() {
            return None;
        }
        Some(self.phases().iter().flatten().sum())
    }

    /// Replace the total by the per-phase sum when they disagree by more
    /// than `tolerance` (relative). A missing total counts as disagreeing.
    fn reconcile_total(&mut self, tolerance: f64) -> bool {
        let Some(sum) = self.phase_sum() else {
            return false;
        };
        let deviates = match self.total {
            None => true,
            Some(total) => (total - sum).abs() > sum.abs() * tolerance,
        };
        if deviates {
            self.total = Some(sum);
        }
        deviates
    }

    /// Total, falling back to DC
    pub fn value(&self) -> Option<f64> {
        self.total.or(self.dc)
    }

    pub fn is_empty(&self) -> bool {
        self.value().is_none() && !self.has_phases()
    }
}

/// Instant readings attached to a consumption, a transaction or a connector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantReadings {
    pub watts: PhaseValues,
    pub amps: PhaseValues,
    pub volts: PhaseValues,
}

impl InstantReadings {
    pub fn is_empty(&self) -> bool {
        self.watts.is_empty() && self.amps.is_empty() && self.volts.is_empty()
    }

    /// Make the readings self-consistent.
    ///
    /// 1. per-phase watts derived from per-phase amps and volts when absent
    /// 2. totals overridden by per-phase sums outside `tolerance`
    /// 3. missing total watts derived from volts and amps, and vice versa
    pub fn reconcile(&mut self, tolerance: f64, default_voltage: f64) {
        if !self.watts.has_phases() && self.amps.has_phases() {
            for slot in [PhaseSlot::L1, PhaseSlot::L2, PhaseSlot::L3] {
                if let Some(amps) = self.amps.get(slot) {
                    let volts = self
                        .volts
                        .get(slot)
                        .or(self.volts.total)
                        .unwrap_or(default_voltage);
                    self.watts.set(slot, amps * volts);
                }
            }
        }

        self.watts.reconcile_total(tolerance);
        self.amps.reconcile_total(tolerance);

        // DC readings keep their own slot
        if self.watts.dc.is_none() {
            if let (Some(volts), Some(amps)) = (self.volts.dc, self.amps.dc) {
                self.watts.dc = Some(volts * amps);
            }
        }

        let volts = self.volts.total.unwrap_or(default_voltage);
        match (self.watts.total, self.amps.total) {
            (None, Some(amps)) if self.volts.total.is_some() => {
                self.watts.total = Some(volts * amps);
            }
            (Some(watts), None) if volts > 0.0 => {
                self.amps.total = Some(watts / volts);
            }
            _ => {}
        }
    }
}
