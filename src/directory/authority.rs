//! Identity authority client
//!
//! The authority owns the address → user mapping. One GET returns both the
//! grouped per-chain lists and the detailed per-user records.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::error::DirectoryError;
use crate::deposit::Chain;

/// Full address set as published by the authority.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    pub grouped: HashMap<Chain, Vec<String>>,
    pub users: Vec<UserRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    #[serde(default)]
    pub addresses: Vec<UserAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAddress {
    pub address: String,
    pub network: String,
}

#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    async fn fetch_addresses(&self) -> Result<AddressBook, DirectoryError>;
}

#[derive(Deserialize)]
struct AuthorityResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<AuthorityData>,
}

#[derive(Deserialize)]
struct AuthorityData {
    #[serde(default)]
    addresses: GroupedAddresses,
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Deserialize, Default)]
struct GroupedAddresses {
    #[serde(default)]
    bitcoin: Vec<String>,
    #[serde(default)]
    tron: Vec<String>,
    #[serde(default)]
    bsc: Vec<String>,
}

impl From<AuthorityData> for AddressBook {
    fn from(data: AuthorityData) -> Self {
        let GroupedAddresses { bitcoin, tron, bsc } = data.addresses;
        let grouped = HashMap::from([(Chain::Btc, bitcoin), (Chain::Tron, tron), (Chain::Bsc, bsc)]);
        AddressBook {
            grouped,
            users: data.users,
        }
    }
}

/// Bearer-authenticated HTTP client for the identity authority
pub struct HttpIdentityAuthority {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpIdentityAuthority {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl IdentityAuthority for HttpIdentityAuthority {
    async fn fetch_addresses(&self) -> Result<AddressBook, DirectoryError> {
        debug!(url = %self.url, "Fetching watched addresses");

        let response: AuthorityResponse = self
            .client
            .get(&self.url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_response(response)
    }
}

fn parse_response(response: AuthorityResponse) -> Result<AddressBook, DirectoryError> {
    if !response.success {
        return Err(DirectoryError::Rejected(
            response
                .message
                .unwrap_or_else(|| "success=false".to_string()),
        ));
    }
    response
        .data
        .map(AddressBook::from)
        .ok_or(DirectoryError::MissingData)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authority_payload() {
        let raw = r#"{
            "success": true,
            "data": {
                "addresses": {
                    "bitcoin": ["bc1qalice"],
                    "tron": ["TAlice", "TBob"],
                    "bsc": []
                },
                "users": [
                    {"userId": "alice", "addresses": [
                        {"address": "bc1qalice", "network": "bitcoin"},
                        {"address": "TAlice", "network": "TRC20"}
                    ]},
                    {"userId": "bob", "addresses": [{"address": "TBob", "network": "tron"}]}
                ]
            }
        }"#;

        let response: AuthorityResponse = serde_json::from_str(raw).unwrap();
        let book = parse_response(response).unwrap();

        assert_eq!(book.grouped[&Chain::Btc], vec!["bc1qalice"]);
        assert_eq!(book.grouped[&Chain::Tron], vec!["TAlice", "TBob"]);
        assert!(book.grouped[&Chain::Bsc].is_empty());
        assert_eq!(book.users.len(), 2);
        assert_eq!(book.users[0].addresses[1].network, "TRC20");
    }

    #[test]
    fn test_parse_rejected_payload() {
        let response: AuthorityResponse =
            serde_json::from_str(r#"{"success": false, "message": "token expired"}"#).unwrap();

        match parse_response(response) {
            Err(DirectoryError::Rejected(msg)) => assert_eq!(msg, "token expired"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_missing_data() {
        let response: AuthorityResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(matches!(
            parse_response(response),
            Err(DirectoryError::MissingData)
        ));
    }
}
