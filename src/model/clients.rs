use serde::{Deserialize, Serialize};

use crate::error::{Error, RsResult};

use super::ModelController;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, strum_macros::Display)]
#[serde(rename_all = "camelCase")]
pub enum ClientRole {
    Operator,
    Admin,
}

/// Caller of a request, resolved from its API key.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ConnectedClient {
    Key(ClientRole),
    Anonymous,
}

impl ConnectedClient {
    pub fn role(&self) -> Option<ClientRole> {
        match self {
            ConnectedClient::Key(role) => Some(*role),
            ConnectedClient::Anonymous => None,
        }
    }

    /// Admin passes every check, anonymous callers never do.
    pub fn check_role(&self, role: ClientRole) -> RsResult<()> {
        match self.role() {
            None => Err(Error::AuthFail),
            Some(current) if current >= role => Ok(()),
            Some(_) => Err(Error::Forbiden),
        }
    }
}

impl ModelController {
    /// Without configured keys every caller is admin. An unknown key is an auth failure, no key is anonymous.
    pub fn resolve_api_key(&self, key: Option<&str>) -> RsResult<ConnectedClient> {
        if !self.config.has_api_keys() {
            return Ok(ConnectedClient::Key(ClientRole::Admin));
        }
        let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
            return Ok(ConnectedClient::Anonymous);
        };
        if self.config.admin_api_key.as_deref() == Some(key) {
            Ok(ConnectedClient::Key(ClientRole::Admin))
        } else if self.config.operator_api_key.as_deref() == Some(key) {
            Ok(ConnectedClient::Key(ClientRole::Operator))
        } else {
            Err(Error::AuthFail)
        }
    }
}
