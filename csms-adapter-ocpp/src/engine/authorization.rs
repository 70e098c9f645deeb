//! Tag authorization for Authorize, StartTransaction and StopTransaction

use chrono::Utc;
use csms_core::{ChargingStation, Transaction};
use tracing::{debug, warn};

use super::OcppEngine;
use crate::error::EngineError;
use crate::ocpp::{Action, AuthorizationStatus};

/// Verdict on a tag presented at a station
#[derive(Debug, Clone, PartialEq)]
pub struct TagAuthorization {
    pub status: AuthorizationStatus,
    pub user_id: Option<String>,
    /// Issued by another operator
    pub roaming: bool,
}

impl TagAuthorization {
    fn refused(status: AuthorizationStatus) -> Self {
        Self {
            status,
            user_id: None,
            roaming: false,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == AuthorizationStatus::Accepted
    }
}

/// Who stops a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct StopAuthorization {
    pub tag_id: String,
    pub user_id: Option<String>,
}

impl OcppEngine {
    pub(crate) async fn authorize_tag(
        &self,
        tenant_id: &str,
        station: &ChargingStation,
        tag_id: &str,
    ) -> Result<TagAuthorization, EngineError> {
        let Some(tag) = self.storage.get_tag(tenant_id, tag_id).await? else {
            warn!("Unknown tag {} presented at {}", tag_id, station.id);
            return Ok(TagAuthorization::refused(AuthorizationStatus::Invalid));
        };

        if !tag.issuer {
            let components = self.storage.get_tenant_components(tenant_id).await?;
            if !components.roaming {
                debug!("Roaming tag {} refused, roaming is disabled", tag_id);
                return Ok(TagAuthorization::refused(AuthorizationStatus::Invalid));
            }
            let accepted = self
                .services
                .roaming
                .authorize(tenant_id, station, tag_id)
                .await
                .map_err(|e| EngineError::Collaborator {
                    service: "roaming",
                    message: e.to_string(),
                })?;
            return Ok(TagAuthorization {
                status: if accepted {
                    AuthorizationStatus::Accepted
                } else {
                    AuthorizationStatus::Invalid
                },
                user_id: tag.user_id,
                roaming: true,
            });
        }

        if !tag.active {
            return Ok(TagAuthorization::refused(AuthorizationStatus::Blocked));
        }

        let user = match &tag.user_id {
            Some(user_id) => self.storage.get_user(tenant_id, user_id).await?,
            None => None,
        };
        Ok(match user {
            Some(user) if user.is_active() => TagAuthorization {
                status: AuthorizationStatus::Accepted,
                user_id: Some(user.id),
                roaming: false,
            },
            Some(user) => {
                debug!("Tag {} belongs to user {} in status {:?}", tag_id, user.id, user.status);
                TagAuthorization::refused(AuthorizationStatus::Blocked)
            }
            None => {
                warn!("Tag {} is not assigned to a known user", tag_id);
                TagAuthorization::refused(AuthorizationStatus::Invalid)
            }
        })
    }

    /// Resolve the stopping tag and check it may stop `transaction`.
    ///
    /// Priority: recent remote stop, tag of the request, tag of the start.
    pub(crate) async fn authorize_stop(
        &self,
        tenant_id: &str,
        station: &ChargingStation,
        transaction: &Transaction,
        request_tag: Option<&str>,
    ) -> Result<StopAuthorization, EngineError> {
        let validity = self.config.remote_stop_validity.as_secs() as i64;
        if let Some(remote_stop) = transaction.recent_remote_stop(Utc::now(), validity) {
            let user_id = match self.storage.get_tag(tenant_id, &remote_stop.tag_id).await? {
                Some(tag) => tag.user_id,
                None => None,
            };
            return Ok(StopAuthorization {
                tag_id: remote_stop.tag_id.clone(),
                user_id,
            });
        }

        let tag_id = request_tag
            .filter(|tag| !tag.is_empty())
            .unwrap_or(&transaction.tag_id);
        if tag_id == transaction.tag_id {
            return Ok(StopAuthorization {
                tag_id: tag_id.to_string(),
                user_id: transaction.user_id.clone(),
            });
        }

        let refused = || {
            EngineError::backend(
                &station.id,
                Action::StopTransaction,
                "Authorizations",
                format!("Tag {} is not allowed to stop transaction {}", tag_id, transaction.id),
            )
        };

        let tag = self
            .storage
            .get_tag(tenant_id, tag_id)
            .await?
            .filter(|tag| tag.active)
            .ok_or_else(refused)?;
        let user = match &tag.user_id {
            Some(user_id) => self.storage.get_user(tenant_id, user_id).await?,
            None => None,
        }
        .filter(|user| user.is_active())
        .ok_or_else(refused)?;

        if user.is_admin() || transaction.user_id.as_deref() == Some(user.id.as_str()) {
            Ok(StopAuthorization {
                tag_id: tag_id.to_string(),
                user_id: Some(user.id),
            })
        } else {
            Err(refused())
        }
    }
}
