//! Core types shared by the session engine
//!
//! OCPP vocabulary (statuses, measurands, units, contexts) plus a few
//! identifiers. Enumerations that come straight off the wire keep their
//! OCPP spelling when serialized.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant identifier
pub type TenantId = String;

/// Charging station identifier (the charge box identity)
pub type ChargingStationId = String;

/// Transaction identifier, `0` means "no transaction"
pub type TransactionId = i64;

/// Connector number, `0` addresses the whole station
pub type ConnectorId = u32;

// ============================================================================
// Protocol
// ============================================================================

/// OCPP protocol version spoken by a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    #[serde(rename = "1.2")]
    V12,
    #[serde(rename = "1.5")]
    V15,
    #[serde(rename = "1.6")]
    V16,
}

impl OcppVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcppVersion::V12 => "1.2",
            OcppVersion::V15 => "1.5",
            OcppVersion::V16 => "1.6",
        }
    }

    /// Parse a WebSocket subprotocol (`ocpp1.6`) or a bare version (`1.6`)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim_start_matches("ocpp") {
            "1.2" => Some(OcppVersion::V12),
            "1.5" => Some(OcppVersion::V15),
            "1.6" => Some(OcppVersion::V16),
            _ => None,
        }
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport flavour the station uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcppProtocol {
    Soap,
    Json,
}

// ============================================================================
// Connector
// ============================================================================

/// Connector status (OCPP 1.6 vocabulary, plus 1.5's `Occupied`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    #[serde(rename = "SuspendedEV")]
    SuspendedEv,
    #[serde(rename = "SuspendedEVSE")]
    SuspendedEvse,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
    /// OCPP 1.5 only, folded into Preparing/Charging on arrival
    Occupied,
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Connector error code reported alongside the status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    #[serde(rename = "EVCommunicationError")]
    EvCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    OverVoltage,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    WeakSignal,
    Mode3Error,
}

impl Default for ChargePointErrorCode {
    fn default() -> Self {
        ChargePointErrorCode::NoError
    }
}

/// Current delivered by a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentType {
    AC,
    DC,
}

/// How worrying the accumulated inactivity of a session is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InactivityStatus {
    Info,
    Warning,
    Error,
}

impl Default for InactivityStatus {
    fn default() -> Self {
        InactivityStatus::Info
    }
}

impl InactivityStatus {
    /// Classify inactivity against the end-of-charge notification interval
    pub fn classify(inactivity_secs: i64, interval_secs: i64) -> Self {
        if inactivity_secs < interval_secs {
            InactivityStatus::Info
        } else if inactivity_secs < interval_secs * 2 {
            InactivityStatus::Warning
        } else {
            InactivityStatus::Error
        }
    }
}

// ============================================================================
// Meter value attributes
// ============================================================================

/// Declares an OCPP string enumeration that tolerates unknown values.
///
/// Vendors send measurands, units and contexts outside the published lists;
/// those land in `Other` instead of failing the whole payload.
macro_rules! ocpp_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $wire,)+
                    $name::Other(s) => s.as_str(),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                match s.as_str() {
                    $($wire => $name::$variant,)+
                    _ => $name::Other(s),
                }
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name::from(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> Self {
                v.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

ocpp_enum! {
    /// What a sampled value measures
    pub enum Measurand {
        CurrentExport => "Current.Export",
        CurrentImport => "Current.Import",
        CurrentOffered => "Current.Offered",
        EnergyActiveExportRegister => "Energy.Active.Export.Register",
        EnergyActiveImportRegister => "Energy.Active.Import.Register",
        EnergyReactiveExportRegister => "Energy.Reactive.Export.Register",
        EnergyReactiveImportRegister => "Energy.Reactive.Import.Register",
        EnergyActiveImportInterval => "Energy.Active.Import.Interval",
        Frequency => "Frequency",
        PowerActiveExport => "Power.Active.Export",
        PowerActiveImport => "Power.Active.Import",
        PowerFactor => "Power.Factor",
        PowerOffered => "Power.Offered",
        StateOfCharge => "SoC",
        Temperature => "Temperature",
        Voltage => "Voltage",
    }
}

ocpp_enum! {
    /// Why a sample was taken
    pub enum ReadingContext {
        InterruptionBegin => "Interruption.Begin",
        InterruptionEnd => "Interruption.End",
        OtherReason => "Other",
        SampleClock => "Sample.Clock",
        SamplePeriodic => "Sample.Periodic",
        TransactionBegin => "Transaction.Begin",
        TransactionEnd => "Transaction.End",
        Trigger => "Trigger",
    }
}

ocpp_enum! {
    /// Encoding of a sampled value
    pub enum ValueFormat {
        Raw => "Raw",
        SignedData => "SignedData",
    }
}

ocpp_enum! {
    /// Where the measurement was taken
    pub enum Location {
        Body => "Body",
        Cable => "Cable",
        Ev => "EV",
        Inlet => "Inlet",
        Outlet => "Outlet",
    }
}

ocpp_enum! {
    /// Unit of a sampled value
    pub enum UnitOfMeasure {
        Wh => "Wh",
        KWh => "kWh",
        Varh => "varh",
        KVarh => "kvarh",
        W => "W",
        KW => "kW",
        Va => "VA",
        KVa => "kVA",
        Var => "var",
        KVar => "kvar",
        A => "A",
        V => "V",
        Celsius => "Celsius",
        Fahrenheit => "Fahrenheit",
        K => "K",
        Percent => "Percent",
    }
}

ocpp_enum! {
    /// Phase a sampled value applies to
    pub enum Phase {
        L1 => "L1",
        L2 => "L2",
        L3 => "L3",
        N => "N",
        L1N => "L1-N",
        L2N => "L2-N",
        L3N => "L3-N",
        L1L2 => "L1-L2",
        L2L3 => "L2-L3",
        L3L1 => "L3-L1",
    }
}

impl Default for ReadingContext {
    fn default() -> Self {
        ReadingContext::SamplePeriodic
    }
}

impl Default for ValueFormat {
    fn default() -> Self {
        ValueFormat::Raw
    }
}

impl Default for Measurand {
    fn default() -> Self {
        Measurand::EnergyActiveImportRegister
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::Outlet
    }
}

impl Default for UnitOfMeasure {
    fn default() -> Self {
        UnitOfMeasure::Wh
    }
}

/// Slot of the instant electrical readings a value feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseSlot {
    Total,
    L1,
    L2,
    L3,
    Dc,
}

impl Phase {
    /// Map an OCPP phase to the per-phase slot it feeds, if any.
    ///
    /// Line-to-line and neutral readings carry no per-phase meaning here.
    pub fn slot(&self) -> Option<PhaseSlot> {
        match self {
            Phase::L1 | Phase::L1N => Some(PhaseSlot::L1),
            Phase::L2 | Phase::L2N => Some(PhaseSlot::L2),
            Phase::L3 | Phase::L3N => Some(PhaseSlot::L3),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_slots() {
        assert_eq!(Phase::L1.slot(), Some(PhaseSlot::L1));
        assert_eq!(Phase::L2N.slot(), Some(PhaseSlot::L2));
        assert_eq!(Phase::L3.slot(), Some(PhaseSlot::L3));
        for phase in [Phase::N, Phase::L1L2, Phase::L2L3, Phase::L3L1] {
            assert_eq!(phase.slot(), None);
        }
    }

    #[test]
    fn test_unknown_measurand_is_preserved() {
        let m: Measurand = serde_json::from_str("\"Vendor.Specific\"").unwrap();
        assert_eq!(m, Measurand::Other("Vendor.Specific".to_string()));
        assert_eq!(serde_json::to_string(&m).unwrap(), "\"Vendor.Specific\"");
    }

    #[test]
    fn test_status_wire_names() {
        let s: ConnectorStatus = serde_json::from_str("\"SuspendedEVSE\"").unwrap();
        assert_eq!(s, ConnectorStatus::SuspendedEvse);
        assert!(serde_json::from_str::<ConnectorStatus>("\"Sleeping\"").is_err());
    }

    #[test]
    fn test_inactivity_classification() {
        assert_eq!(InactivityStatus::classify(0, 3600), InactivityStatus::Info);
        assert_eq!(InactivityStatus::classify(3600, 3600), InactivityStatus::Warning);
        assert_eq!(InactivityStatus::classify(7200, 3600), InactivityStatus::Error);
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(OcppVersion::parse("ocpp1.6"), Some(OcppVersion::V16));
        assert_eq!(OcppVersion::parse("1.5"), Some(OcppVersion::V15));
        assert_eq!(OcppVersion::parse("ocpp2.0.1"), None);
    }
}
