//! Per-request context
//!
//! Everything the transport knows about the sender of a message. Passed
//! explicitly through every handler; there is no "current station" state.

use csms_core::{OcppProtocol, OcppVersion, TenantId};

#[derive(Debug, Clone, PartialEq)]
pub struct OcppHeaders {
    pub tenant_id: TenantId,
    pub charge_box_identity: String,
    pub ocpp_version: OcppVersion,
    pub ocpp_protocol: OcppProtocol,
    pub current_ip: Option<String>,
    pub site_id: Option<String>,
    pub site_area_id: Option<String>,
    /// Registration token presented by a station that is not yet known
    pub token: Option<String>,
}

impl OcppHeaders {
    pub fn new(tenant_id: impl Into<String>, charge_box_identity: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            charge_box_identity: charge_box_identity.into(),
            ocpp_version: OcppVersion::V16,
            ocpp_protocol: OcppProtocol::Json,
            current_ip: None,
            site_id: None,
            site_area_id: None,
            token: None,
        }
    }

    pub fn with_version(mut self, version: OcppVersion, protocol: OcppProtocol) -> Self {
        self.ocpp_version = version;
        self.ocpp_protocol = protocol;
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.current_ip = Some(ip.into());
        self
    }

    pub fn with_site_area(mut self, site_id: impl Into<String>, site_area_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self.site_area_id = Some(site_area_id.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}
