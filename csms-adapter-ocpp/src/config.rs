//! Configuration for the OCPP session engine
//!
//! Protocol timings, deferred side-effect delays and the vendor-specific
//! tunables of meter value processing.

use std::net::SocketAddr;
use std::time::Duration;

use csms_core::{ConsumptionSettings, MeterValueNormalizer, OcppVersion};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Heartbeat interval returned by BootNotification
    pub heartbeat_interval: Duration,

    /// Delay before pulling the OCPP parameters of a booted station
    pub ocpp_parameters_delay: Duration,

    /// Timeout of the OCPP parameters pull
    pub ocpp_parameters_timeout: Duration,

    /// Delay before re-running smart charging after a stop
    pub smart_charging_delay: Duration,

    /// Timeout of one smart charging computation
    pub smart_charging_timeout: Duration,

    /// How long a recorded remote stop authorizes a StopTransaction
    pub remote_stop_validity: Duration,

    /// Relative tolerance between per-phase sums and reported totals
    pub phase_tolerance: f64,

    /// Voltage assumed when a station reports none
    pub default_voltage: f64,

    /// Minimum current per phase a car needs to keep charging
    pub min_amps_per_phase: f64,

    /// End-of-charge notification interval, the unit of inactivity levels
    pub inactivity_notification_interval: Duration,

    /// Vendors whose connector 0 status is ignored
    pub ignore_connector_zero_vendors: Vec<String>,

    /// Vendor/protocol pairs whose `Sample.Clock` readings are kept
    pub keep_clock_samples: Vec<(String, OcppVersion)>,

    /// Include chargeBoxSerialNumber in the Boot identity check
    pub check_boot_serial_number: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            ocpp_parameters_delay: Duration::from_secs(10),
            ocpp_parameters_timeout: Duration::from_secs(30),
            smart_charging_delay: Duration::from_secs(3),
            smart_charging_timeout: Duration::from_secs(60),
            remote_stop_validity: Duration::from_secs(60),
            phase_tolerance: 0.10,
            default_voltage: 230.0,
            min_amps_per_phase: 6.0,
            inactivity_notification_interval: Duration::from_secs(60 * 60),
            ignore_connector_zero_vendors: Vec::new(),
            keep_clock_samples: vec![("ABB".to_string(), OcppVersion::V15)],
            check_boot_serial_number: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set delay and timeout of the post-boot parameter pull
    pub fn with_ocpp_parameters(mut self, delay: Duration, timeout: Duration) -> Self {
        self.ocpp_parameters_delay = delay;
        self.ocpp_parameters_timeout = timeout;
        self
    }

    /// Set delay and timeout of smart charging runs
    pub fn with_smart_charging(mut self, delay: Duration, timeout: Duration) -> Self {
        self.smart_charging_delay = delay;
        self.smart_charging_timeout = timeout;
        self
    }

    pub fn with_remote_stop_validity(mut self, validity: Duration) -> Self {
        self.remote_stop_validity = validity;
        self
    }

    pub fn with_phase_tolerance(mut self, tolerance: f64) -> Self {
        self.phase_tolerance = tolerance;
        self
    }

    pub fn with_default_voltage(mut self, volts: f64) -> Self {
        self.default_voltage = volts;
        self
    }

    pub fn with_inactivity_notification_interval(mut self, interval: Duration) -> Self {
        self.inactivity_notification_interval = interval;
        self
    }

    /// Ignore connector 0 notifications of a vendor
    pub fn with_ignored_connector_zero_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.ignore_connector_zero_vendors.push(vendor.into());
        self
    }

    /// Keep `Sample.Clock` readings of a vendor/protocol pair
    pub fn with_clock_samples_kept(mut self, vendor: impl Into<String>, version: OcppVersion) -> Self {
        self.keep_clock_samples.push((vendor.into(), version));
        self
    }

    pub fn without_boot_serial_check(mut self) -> Self {
        self.check_boot_serial_number = false;
        self
    }

    pub fn ignores_connector_zero(&self, vendor: &str) -> bool {
        self.ignore_connector_zero_vendors
            .iter()
            .any(|v| v.eq_ignore_ascii_case(vendor))
    }

    pub fn inactivity_interval_secs(&self) -> i64 {
        self.inactivity_notification_interval.as_secs() as i64
    }

    pub fn consumption_settings(&self) -> ConsumptionSettings {
        ConsumptionSettings {
            phase_tolerance: self.phase_tolerance,
            default_voltage: self.default_voltage,
            min_amps_per_phase: self.min_amps_per_phase,
        }
    }

    pub fn normalizer(&self) -> MeterValueNormalizer {
        MeterValueNormalizer::new(self.keep_clock_samples.clone())
    }
}

/// WebSocket front door configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,

    /// Largest accepted message
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8010)),
            max_message_size: 64 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            ..Default::default()
        }
    }
}
