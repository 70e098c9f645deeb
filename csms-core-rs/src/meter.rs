//! Meter value normalization
//!
//! OCPP 1.5 and 1.6 carry meter values in different shapes:
//! - 1.5: `values[]`, each `value` a plain string or `{"$value", attributes}`,
//!   possibly not wrapped in an array
//! - 1.6: `meterValue[].sampledValue[]` with inline attributes
//!
//! Both are parsed into [`RawMeterValues`] and flattened into one
//! [`NormalizedMeterValue`] per sample. Nothing downstream sees the
//! version-specific shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::station::ChargingStation;
use crate::types::*;

// ============================================================================
// Raw payloads
// ============================================================================

/// A JSON field that may hold one item or an array of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            OneOrMany::Many(items) => items.iter(),
            OneOrMany::One(item) => std::slice::from_ref(item).iter(),
        }
    }
}

/// Attributes of one sample, all optional on the wire
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ReadingContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ValueFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitOfMeasure>,
}

/// OCPP 1.6 `sampledValue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSampledValue {
    pub value: Value,
    #[serde(flatten)]
    pub attributes: RawAttributes,
}

/// OCPP 1.6 `meterValue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMeterValue16 {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<RawSampledValue>,
}

/// OCPP 1.5 `value`: attributed or bare
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue15 {
    Attributed {
        #[serde(rename = "$value")]
        value: Value,
        #[serde(default)]
        attributes: Option<RawAttributes>,
    },
    Bare(Value),
}

/// OCPP 1.5 `values` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeterValue15 {
    pub timestamp: DateTime<Utc>,
    pub value: OneOrMany<RawValue15>,
}

/// Meter values as received, tagged by protocol shape
#[derive(Debug, Clone, PartialEq)]
pub enum RawMeterValues {
    V15(Vec<RawMeterValue15>),
    V16(Vec<RawMeterValue16>),
}

// ============================================================================
// Normalized values
// ============================================================================

/// Sample value, numeric unless the station signed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Numeric(f64),
    Signed(String),
}

impl SampleValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SampleValue::Numeric(v) => Some(*v),
            SampleValue::Signed(_) => None,
        }
    }
}

/// Attributes with OCPP defaults applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValueAttribute {
    pub context: ReadingContext,
    pub format: ValueFormat,
    pub measurand: Measurand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub location: Location,
    pub unit: UnitOfMeasure,
}

impl MeterValueAttribute {
    fn from_raw(raw: Option<&RawAttributes>) -> Self {
        let raw = raw.cloned().unwrap_or_default();
        Self {
            context: raw.context.unwrap_or_default(),
            format: raw.format.unwrap_or_default(),
            measurand: raw.measurand.unwrap_or_default(),
            phase: raw.phase,
            location: raw.location.unwrap_or_default(),
            unit: raw.unit.unwrap_or_default(),
        }
    }

    /// Energy register reading in a given context, used for the stop value
    pub fn energy_register(context: ReadingContext) -> Self {
        Self {
            context,
            format: ValueFormat::Raw,
            measurand: Measurand::EnergyActiveImportRegister,
            phase: None,
            location: Location::Outlet,
            unit: UnitOfMeasure::Wh,
        }
    }
}

/// One sample, unit-consistent and protocol-independent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMeterValue {
    pub timestamp: DateTime<Utc>,
    pub connector_id: ConnectorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    pub current_type: CurrentType,
    pub attribute: MeterValueAttribute,
    pub value: SampleValue,
}

impl NormalizedMeterValue {
    pub fn numeric(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn is_signed(&self) -> bool {
        self.attribute.format == ValueFormat::SignedData
    }

    fn context_in(&self, contexts: &[ReadingContext]) -> bool {
        contexts.contains(&self.attribute.context)
    }

    pub fn is_soc(&self) -> bool {
        self.attribute.measurand == Measurand::StateOfCharge
            && self.context_in(&[
                ReadingContext::SamplePeriodic,
                ReadingContext::SampleClock,
                ReadingContext::TransactionBegin,
                ReadingContext::TransactionEnd,
            ])
    }

    pub fn is_energy_register(&self) -> bool {
        self.attribute.measurand == Measurand::EnergyActiveImportRegister
            && self.attribute.location != Location::Inlet
            && self.attribute.unit == UnitOfMeasure::Wh
            && self.context_in(&[
                ReadingContext::SamplePeriodic,
                ReadingContext::SampleClock,
                ReadingContext::TransactionEnd,
            ])
    }

    fn is_instant(&self, measurand: Measurand, unit: UnitOfMeasure) -> bool {
        self.attribute.measurand == measurand
            && self.attribute.unit == unit
            && self.context_in(&[ReadingContext::SamplePeriodic, ReadingContext::SampleClock])
    }

    pub fn is_power(&self) -> bool {
        self.is_instant(Measurand::PowerActiveImport, UnitOfMeasure::W)
    }

    pub fn is_current(&self) -> bool {
        self.is_instant(Measurand::CurrentImport, UnitOfMeasure::A)
    }

    pub fn is_voltage(&self) -> bool {
        self.is_instant(Measurand::Voltage, UnitOfMeasure::V)
    }

    /// Whether the value takes part in the consumption computation.
    ///
    /// Everything else is still stored as received.
    pub fn is_valid_meter_value(&self) -> bool {
        if self.is_signed() || self.numeric().is_none() {
            return false;
        }
        self.is_soc()
            || self.is_energy_register()
            || self.is_power()
            || self.is_current()
            || self.is_voltage()
    }

    /// Per-phase slot the value feeds, DC connectors use their own slot.
    ///
    /// `None` for neutral and line-to-line readings.
    pub fn slot(&self) -> Option<PhaseSlot> {
        match &self.attribute.phase {
            Some(phase) => phase.slot(),
            None if self.current_type == CurrentType::DC => Some(PhaseSlot::Dc),
            None => Some(PhaseSlot::Total),
        }
    }
}

// ============================================================================
// Normalizer
// ============================================================================

/// Flattens raw meter values into [`NormalizedMeterValue`]s
#[derive(Debug, Clone, Default)]
pub struct MeterValueNormalizer {
    /// `(vendor, version)` pairs whose `Sample.Clock` readings are kept
    keep_clock_samples: Vec<(String, OcppVersion)>,
}

impl MeterValueNormalizer {
    pub fn new(keep_clock_samples: Vec<(String, OcppVersion)>) -> Self {
        Self { keep_clock_samples }
    }

    /// Whether `Sample.Clock` readings of this station are trusted
    pub fn keeps_clock_samples(&self, station: &ChargingStation) -> bool {
        self.keep_clock_samples.iter().any(|(vendor, version)| {
            vendor.eq_ignore_ascii_case(&station.charge_point_vendor)
                && *version == station.ocpp_version
        })
    }

    pub fn normalize(
        &self,
        station: &ChargingStation,
        connector_id: ConnectorId,
        transaction_id: Option<TransactionId>,
        raw: &RawMeterValues,
    ) -> Vec<NormalizedMeterValue> {
        let current_type = station.current_type(connector_id);
        let keep_clock = self.keeps_clock_samples(station);

        let mut samples: Vec<(DateTime<Utc>, &Value, Option<&RawAttributes>)> = Vec::new();
        match raw {
            RawMeterValues::V16(meter_values) => {
                for mv in meter_values {
                    for sv in &mv.sampled_value {
                        samples.push((mv.timestamp, &sv.value, Some(&sv.attributes)));
                    }
                }
            }
            RawMeterValues::V15(meter_values) => {
                for mv in meter_values {
                    for value in mv.value.iter() {
                        match value {
                            RawValue15::Attributed { value, attributes } => {
                                samples.push((mv.timestamp, value, attributes.as_ref()))
                            }
                            RawValue15::Bare(value) => samples.push((mv.timestamp, value, None)),
                        }
                    }
                }
            }
        }

        let mut normalized = Vec::with_capacity(samples.len());
        for (timestamp, value, attributes) in samples {
            let mut attribute = MeterValueAttribute::from_raw(attributes);

            if attribute.context == ReadingContext::SampleClock && !keep_clock {
                debug!(
                    "Station {}: dropping Sample.Clock {} reading",
                    station.id, attribute.measurand
                );
                continue;
            }

            let value = if attribute.format == ValueFormat::SignedData {
                match value {
                    Value::String(s) => SampleValue::Signed(s.clone()),
                    other => SampleValue::Signed(other.to_string()),
                }
            } else {
                let Some(number) = parse_number(value) else {
                    warn!(
                        "Station {}: unparsable {} value {} skipped",
                        station.id, attribute.measurand, value
                    );
                    continue;
                };
                SampleValue::Numeric(scale_unit(&mut attribute, number))
            };

            normalized.push(NormalizedMeterValue {
                timestamp,
                connector_id,
                transaction_id,
                current_type,
                attribute,
                value,
            });
        }
        normalized
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Bring kilo-units down to the base unit
fn scale_unit(attribute: &mut MeterValueAttribute, value: f64) -> f64 {
    match attribute.unit {
        UnitOfMeasure::KWh => {
            attribute.unit = UnitOfMeasure::Wh;
            value * 1000.0
        }
        UnitOfMeasure::KW => {
            attribute.unit = UnitOfMeasure::W;
            value * 1000.0
        }
        _ => value,
    }
}
