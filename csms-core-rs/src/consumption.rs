//! Consumption building
//!
//! Folds normalized meter values into consumption intervals relative to the
//! transaction's watermark:
//! - energy register values close an interval (`consumptionWh` = delta)
//! - power/current/voltage only fill the instant fields of that interval
//! - values sharing a timestamp are merged into one interval
//! - intervals ending before the watermark are dropped
//!
//! Every interval is applied to the transaction as soon as it is built, so
//! cumulative totals only ever grow by the interval's own delta.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::meter::NormalizedMeterValue;
use crate::readings::{InstantReadings, PhaseValues};
use crate::station::Connector;
use crate::transaction::Transaction;
use crate::types::*;

/// Computed interval between two energy readings, never mutated once stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumption {
    pub transaction_id: TransactionId,
    pub charging_station_id: ChargingStationId,
    pub connector_id: ConnectorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_area_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Energy register value at `ended_at`
    pub meter_value_wh: f64,
    pub consumption_wh: f64,
    pub consumption_amps: f64,
    pub cumulated_consumption_wh: f64,
    pub instant: InstantReadings,
    pub inactivity_secs: i64,
    pub total_inactivity_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_of_charge: Option<f64>,
    pub to_price: bool,

    // Filled by pricing before the consumption is stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulated_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl Consumption {
    fn empty(transaction: &Transaction, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        Self {
            transaction_id: transaction.id,
            charging_station_id: transaction.charging_station_id.clone(),
            connector_id: transaction.connector_id,
            site_area_id: transaction.site_area_id.clone(),
            user_id: transaction.user_id.clone(),
            started_at,
            ended_at,
            meter_value_wh: transaction.last_consumption.value,
            consumption_wh: 0.0,
            consumption_amps: 0.0,
            cumulated_consumption_wh: transaction.current_total_consumption_wh,
            instant: InstantReadings::default(),
            inactivity_secs: 0,
            total_inactivity_secs: transaction.current_total_inactivity_secs,
            state_of_charge: None,
            to_price: true,
            amount: None,
            cumulated_amount: None,
            currency: None,
        }
    }

    /// Zero-length baseline created when a transaction opens
    pub fn opening(transaction: &Transaction) -> Self {
        let mut consumption = Self::empty(transaction, transaction.timestamp, transaction.timestamp);
        consumption.state_of_charge = transaction.state_of_charge;
        consumption
    }

    /// Zero-length interval at the watermark, used when a stop brings no new reading
    pub fn closing(transaction: &Transaction) -> Self {
        let at = transaction.last_consumption.timestamp;
        let mut consumption = Self::empty(transaction, at, at);
        consumption.state_of_charge = transaction.current_state_of_charge;
        consumption
    }

    pub fn duration_secs(&self) -> i64 {
        (self.ended_at - self.started_at).num_seconds().max(0)
    }
}

/// Tunables of the consumption computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumptionSettings {
    /// Relative tolerance between per-phase sums and reported totals
    pub phase_tolerance: f64,
    /// Voltage assumed when the station does not report one
    pub default_voltage: f64,
    /// Below this limit per phase, idle time is not the driver's inactivity
    pub min_amps_per_phase: f64,
}

impl Default for ConsumptionSettings {
    fn default() -> Self {
        Self {
            phase_tolerance: 0.10,
            default_voltage: 230.0,
            min_amps_per_phase: 6.0,
        }
    }
}

/// Folds meter values into consumptions
#[derive(Debug, Clone, Default)]
pub struct ConsumptionBuilder {
    settings: ConsumptionSettings,
}

impl ConsumptionBuilder {
    pub fn new(settings: ConsumptionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ConsumptionSettings {
        &self.settings
    }

    /// Fold `values` into `transaction`, returning the new consumptions
    /// sorted by `started_at`.
    ///
    /// Invalid values are ignored here. Values sharing a timestamp form one
    /// interval, last write per field wins.
    pub fn fold(
        &self,
        transaction: &mut Transaction,
        connector: Option<&Connector>,
        values: &[NormalizedMeterValue],
    ) -> Vec<Consumption> {
        let mut valid: Vec<&NormalizedMeterValue> =
            values.iter().filter(|v| v.is_valid_meter_value()).collect();
        valid.sort_by_key(|v| v.timestamp);

        let limited = connector
            .map(|c| c.is_limited_below_minimum(self.settings.min_amps_per_phase))
            .unwrap_or(false);

        let mut consumptions = Vec::new();
        for group in valid.chunk_by(|a, b| a.timestamp == b.timestamp) {
            let timestamp = group[0].timestamp;
            if timestamp < transaction.last_consumption.timestamp {
                warn!(
                    "Transaction {}: meter value at {} is older than {}, dropped",
                    transaction.id, timestamp, transaction.last_consumption.timestamp
                );
                continue;
            }

            if let Some(consumption) = self.fold_group(transaction, group, timestamp, limited) {
                transaction.apply_consumption(&consumption);
                consumptions.push(consumption);
            }
        }

        consumptions.sort_by_key(|c| c.started_at);
        consumptions
    }

    fn fold_group(
        &self,
        transaction: &mut Transaction,
        group: &[&NormalizedMeterValue],
        timestamp: DateTime<Utc>,
        limited: bool,
    ) -> Option<Consumption> {
        let mut instant = InstantReadings::default();
        let mut energy: Option<f64> = None;
        let mut phase_energy = PhaseValues::default();
        let mut state_of_charge: Option<f64> = None;

        for value in group {
            let Some(number) = value.numeric() else {
                continue;
            };
            if value.is_energy_register() {
                match (&value.attribute.phase, value.slot()) {
                    (None, _) => energy = Some(number),
                    (Some(_), Some(slot)) => phase_energy.set(slot, number),
                    (Some(_), None) => {}
                }
            } else if value.is_power() || value.is_current() || value.is_voltage() {
                let Some(slot) = value.slot() else {
                    debug!(
                        "Transaction {}: {:?} reading on phase {:?} ignored",
                        transaction.id, value.attribute.measurand, value.attribute.phase
                    );
                    continue;
                };
                let readings = if value.is_power() {
                    &mut instant.watts
                } else if value.is_current() {
                    &mut instant.amps
                } else {
                    &mut instant.volts
                };
                readings.set(slot, number);
            } else if value.is_soc() {
                if value.attribute.context == ReadingContext::TransactionBegin
                    && transaction.state_of_charge.is_none()
                {
                    transaction.state_of_charge = Some(number);
                }
                state_of_charge = Some(number);
            }
        }

        if !instant.is_empty() {
            instant.reconcile(self.settings.phase_tolerance, self.settings.default_voltage);
        }

        // Per-phase registers only count when no whole-meter register was sent
        let Some(meter_value_wh) = energy.or_else(|| phase_energy.phase_sum()) else {
            // Nothing to price: only refresh the live readings
            if !instant.is_empty() {
                transaction.current_instant = instant;
            }
            if state_of_charge.is_some() {
                transaction.current_state_of_charge = state_of_charge;
            }
            return None;
        };

        let watermark = transaction.last_consumption;
        if timestamp == watermark.timestamp && meter_value_wh <= watermark.value {
            debug!(
                "Transaction {}: meter value {} Wh at {} already accounted",
                transaction.id, meter_value_wh, timestamp
            );
            if !instant.is_empty() {
                transaction.current_instant = instant;
            }
            return None;
        }

        let mut consumption = Consumption::empty(transaction, watermark.timestamp, timestamp);
        consumption.meter_value_wh = meter_value_wh.max(watermark.value);
        consumption.instant = instant;
        consumption.state_of_charge = state_of_charge;

        let duration_secs = consumption.duration_secs();
        if meter_value_wh > watermark.value {
            consumption.consumption_wh = meter_value_wh - watermark.value;
            if duration_secs > 0 {
                let average_watts = consumption.consumption_wh * 3600.0 / duration_secs as f64;
                let volts = instant.volts.value().unwrap_or(self.settings.default_voltage);
                consumption.consumption_amps = average_watts / volts;
            }
        } else {
            if meter_value_wh < watermark.value {
                warn!(
                    "Transaction {}: meter went back from {} Wh to {} Wh",
                    transaction.id, watermark.value, meter_value_wh
                );
            }
            if !limited {
                consumption.inactivity_secs = duration_secs;
            }
        }

        consumption.cumulated_consumption_wh =
            transaction.current_total_consumption_wh + consumption.consumption_wh;
        consumption.total_inactivity_secs =
            transaction.current_total_inactivity_secs + consumption.inactivity_secs;

        Some(consumption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::{MeterValueAttribute, SampleValue};
    use chrono::Duration;

    fn value(
        at: DateTime<Utc>,
        measurand: Measurand,
        unit: UnitOfMeasure,
        phase: Option<Phase>,
        v: f64,
    ) -> NormalizedMeterValue {
        NormalizedMeterValue {
            timestamp: at,
            connector_id: 1,
            transaction_id: Some(1),
            current_type: CurrentType::AC,
            attribute: MeterValueAttribute {
                context: ReadingContext::SamplePeriodic,
                format: ValueFormat::Raw,
                measurand,
                phase,
                location: Location::Outlet,
                unit,
            },
            value: SampleValue::Numeric(v),
        }
    }

    fn energy(at: DateTime<Utc>, wh: f64) -> NormalizedMeterValue {
        value(at, Measurand::EnergyActiveImportRegister, UnitOfMeasure::Wh, None, wh)
    }

    #[test]
    fn test_energy_sequence() {
        let start = Utc::now();
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 0.0, start);
        let values: Vec<_> = [1000.0, 2500.0, 2500.0, 4000.0]
            .iter()
            .enumerate()
            .map(|(i, wh)| energy(start + Duration::minutes(i as i64 + 1), *wh))
            .collect();

        let consumptions = ConsumptionBuilder::default().fold(&mut tx, None, &values);

        let deltas: Vec<f64> = consumptions.iter().map(|c| c.consumption_wh).collect();
        assert_eq!(deltas, vec![1000.0, 1500.0, 0.0, 1500.0]);
        assert_eq!(consumptions[2].inactivity_secs, 60);
        assert_eq!(consumptions[3].cumulated_consumption_wh, 4000.0);
        assert_eq!(tx.current_total_consumption_wh, 4000.0);
        assert_eq!(tx.current_total_inactivity_secs, 60);
        assert_eq!(tx.current_total_duration_secs, 240);
    }

    #[test]
    fn test_past_values_dropped() {
        let start = Utc::now();
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 0.0, start);
        let builder = ConsumptionBuilder::default();

        builder.fold(&mut tx, None, &[energy(start + Duration::minutes(2), 2000.0)]);
        let late = builder.fold(&mut tx, None, &[energy(start + Duration::minutes(1), 1000.0)]);

        assert!(late.is_empty());
        assert_eq!(tx.current_total_consumption_wh, 2000.0);
    }

    #[test]
    fn test_same_timestamp_merged() {
        let start = Utc::now();
        let at = start + Duration::minutes(1);
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 0.0, start);

        let values = vec![
            energy(at, 500.0),
            value(at, Measurand::PowerActiveImport, UnitOfMeasure::W, None, 11000.0),
            energy(at, 600.0),
        ];
        let consumptions = ConsumptionBuilder::default().fold(&mut tx, None, &values);

        assert_eq!(consumptions.len(), 1);
        assert_eq!(consumptions[0].consumption_wh, 600.0);
        assert_eq!(consumptions[0].instant.watts.total, Some(11000.0));
    }

    #[test]
    fn test_phase_reconciliation_in_interval() {
        let start = Utc::now();
        let at = start + Duration::minutes(1);
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 0.0, start);

        let w = |phase, v| value(at, Measurand::PowerActiveImport, UnitOfMeasure::W, phase, v);
        let values = vec![
            energy(at, 50.0),
            w(None, 500.0),
            w(Some(Phase::L1), 1000.0),
            w(Some(Phase::L2), 1000.0),
            w(Some(Phase::L3), 1000.0),
        ];
        let consumptions = ConsumptionBuilder::default().fold(&mut tx, None, &values);

        assert_eq!(consumptions[0].instant.watts.total, Some(3000.0));
        assert_eq!(tx.current_instant.watts.total, Some(3000.0));
    }

    #[test]
    fn test_neutral_and_line_to_line_readings_ignored() {
        let start = Utc::now();
        let at = start + Duration::minutes(1);
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 0.0, start);

        let values = vec![
            energy(at, 500.0),
            value(at, Measurand::CurrentImport, UnitOfMeasure::A, None, 32.0),
            value(at, Measurand::CurrentImport, UnitOfMeasure::A, Some(Phase::N), 0.0),
            value(at, Measurand::Voltage, UnitOfMeasure::V, Some(Phase::L1L2), 400.0),
            value(at, Measurand::Voltage, UnitOfMeasure::V, Some(Phase::L1N), 230.0),
        ];
        let consumptions = ConsumptionBuilder::default().fold(&mut tx, None, &values);

        let instant = consumptions[0].instant;
        assert_eq!(instant.amps.total, Some(32.0));
        assert_eq!(instant.volts.total, None);
        assert_eq!(instant.volts.l1, Some(230.0));
        assert_eq!(instant.watts.total, None);
    }

    #[test]
    fn test_per_phase_energy_registers_summed() {
        let start = Utc::now();
        let builder = ConsumptionBuilder::default();
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 0.0, start);

        let registers = |at, l1, l2, l3| {
            vec![
                value(at, Measurand::EnergyActiveImportRegister, UnitOfMeasure::Wh, Some(Phase::L1), l1),
                value(at, Measurand::EnergyActiveImportRegister, UnitOfMeasure::Wh, Some(Phase::L2), l2),
                value(at, Measurand::EnergyActiveImportRegister, UnitOfMeasure::Wh, Some(Phase::L3), l3),
                value(at, Measurand::EnergyActiveImportRegister, UnitOfMeasure::Wh, Some(Phase::N), 5.0),
            ]
        };

        let first = builder.fold(&mut tx, None, &registers(start + Duration::minutes(1), 1000.0, 1000.0, 900.0));
        assert_eq!(first[0].consumption_wh, 2900.0);

        let second = builder.fold(&mut tx, None, &registers(start + Duration::minutes(2), 1500.0, 1400.0, 1000.0));
        assert_eq!(second[0].consumption_wh, 1000.0);
        assert_eq!(second[0].inactivity_secs, 0);
        assert_eq!(tx.current_total_consumption_wh, 3900.0);
    }

    #[test]
    fn test_whole_meter_register_wins_over_phases() {
        let start = Utc::now();
        let at = start + Duration::minutes(1);
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 0.0, start);

        let values = vec![
            value(at, Measurand::EnergyActiveImportRegister, UnitOfMeasure::Wh, Some(Phase::L1), 100.0),
            energy(at, 3000.0),
            value(at, Measurand::EnergyActiveImportRegister, UnitOfMeasure::Wh, Some(Phase::L2), 100.0),
        ];
        let consumptions = ConsumptionBuilder::default().fold(&mut tx, None, &values);

        assert_eq!(consumptions[0].consumption_wh, 3000.0);
    }

    #[test]
    fn test_limited_connector_accrues_no_inactivity() {
        let start = Utc::now();
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 100.0, start);
        let mut connector = Connector::new(1);
        connector.amperage_limit = Some(6.0);

        let consumptions = ConsumptionBuilder::default().fold(
            &mut tx,
            Some(&connector),
            &[energy(start + Duration::minutes(5), 100.0)],
        );

        assert_eq!(consumptions[0].consumption_wh, 0.0);
        assert_eq!(consumptions[0].inactivity_secs, 0);
        assert_eq!(tx.current_total_inactivity_secs, 0);
    }

    #[test]
    fn test_instant_only_values_refresh_transaction() {
        let start = Utc::now();
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 0.0, start);

        let consumptions = ConsumptionBuilder::default().fold(
            &mut tx,
            None,
            &[value(
                start + Duration::seconds(30),
                Measurand::CurrentImport,
                UnitOfMeasure::A,
                None,
                16.0,
            )],
        );

        assert!(consumptions.is_empty());
        assert_eq!(tx.current_instant.amps.total, Some(16.0));
        assert_eq!(tx.last_consumption.timestamp, start);
    }

    #[test]
    fn test_average_amps() {
        let start = Utc::now();
        let mut tx = Transaction::open(1, "CS001", 1, "TAG", 0.0, start);

        let consumptions = ConsumptionBuilder::default().fold(
            &mut tx,
            None,
            &[energy(start + Duration::hours(1), 2300.0)],
        );
        assert!((consumptions[0].consumption_amps - 10.0).abs() < 1e-9);
    }
}
