//! Connector configuration records and their resolution
//!
//! A record belongs to exactly one user or one organization. Resolution for a
//! user falls back from the user's record to the organization's, then to the
//! system defaults in [`ConnectorsConfig`].

use crate::config::ConnectorsConfig;
use crate::connector::providers::ProviderKind;
use crate::error::{ImportError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfiguration {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub provider: ProviderKind,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_rows: Option<u64>,
}

impl ConnectorConfiguration {
    pub fn for_user(provider: ProviderKind, user_id: impl Into<String>, enabled: bool, max_rows: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            user_id: Some(user_id.into()),
            organization_id: None,
            enabled,
            max_rows,
        }
    }

    pub fn for_organization(
        provider: ProviderKind,
        organization_id: impl Into<String>,
        enabled: bool,
        max_rows: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            user_id: None,
            organization_id: Some(organization_id.into()),
            enabled,
            max_rows,
        }
    }

    /// Exactly one of user or organization must be set
    pub fn validate(&self) -> Result<()> {
        match (&self.user_id, &self.organization_id) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err(ImportError::ConnectorConfigInvalid(
                "configuration cannot belong to both a user and an organization".to_string(),
            )),
            (None, None) => Err(ImportError::ConnectorConfigInvalid(
                "configuration must belong to a user or an organization".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationSource {
    User,
    Organization,
    Default,
}

/// Effective settings of one provider for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfiguration {
    pub provider: ProviderKind,
    pub enabled: bool,
    pub max_rows: Option<u64>,
    pub source: ConfigurationSource,
}

/// In-memory set of configuration records
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfigurations {
    records: Vec<ConnectorConfiguration>,
    defaults: ConnectorsConfig,
}

impl ConnectorConfigurations {
    pub fn new(defaults: ConnectorsConfig) -> Self {
        Self {
            records: Vec::new(),
            defaults,
        }
    }

    pub fn with_records(
        defaults: ConnectorsConfig,
        records: impl IntoIterator<Item = ConnectorConfiguration>,
    ) -> Result<Self> {
        let mut configurations = Self::new(defaults);
        for record in records {
            configurations.insert(record)?;
        }
        Ok(configurations)
    }

    pub fn records(&self) -> &[ConnectorConfiguration] {
        &self.records
    }

    /// Add a record; one record per provider and owner
    pub fn insert(&mut self, record: ConnectorConfiguration) -> Result<()> {
        record.validate()?;
        let duplicate = self.records.iter().any(|existing| {
            existing.provider == record.provider
                && existing.user_id == record.user_id
                && existing.organization_id == record.organization_id
        });
        if duplicate {
            return Err(ImportError::ConnectorConfigInvalid(format!(
                "a {} configuration already exists for this owner",
                record.provider
            )));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn remove(&mut self, id: Uuid) -> Option<ConnectorConfiguration> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    pub fn for_user(
        &self,
        provider: ProviderKind,
        user_id: &str,
        organization_id: Option<&str>,
    ) -> ResolvedConfiguration {
        let user_record = self
            .records
            .iter()
            .find(|r| r.provider == provider && r.user_id.as_deref() == Some(user_id));
        if let Some(record) = user_record {
            return resolved(record, ConfigurationSource::User);
        }

        let organization_record = organization_id.and_then(|org| {
            self.records
                .iter()
                .find(|r| r.provider == provider && r.organization_id.as_deref() == Some(org))
        });
        if let Some(record) = organization_record {
            return resolved(record, ConfigurationSource::Organization);
        }

        let defaults = self.defaults.defaults_for(provider.name());
        ResolvedConfiguration {
            provider,
            enabled: defaults.enabled,
            max_rows: defaults.max_rows,
            source: ConfigurationSource::Default,
        }
    }
}

fn resolved(record: &ConnectorConfiguration, source: ConfigurationSource) -> ResolvedConfiguration {
    ResolvedConfiguration {
        provider: record.provider,
        enabled: record.enabled,
        max_rows: record.max_rows,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderDefaults;

    fn defaults() -> ConnectorsConfig {
        let mut config = ConnectorsConfig::default();
        config.providers.insert(
            "mysql".to_string(),
            ProviderDefaults {
                enabled: true,
                max_rows: Some(1000),
            },
        );
        config
    }

    #[test]
    fn test_resolution_precedence() {
        let configurations = ConnectorConfigurations::with_records(
            defaults(),
            vec![
                ConnectorConfiguration::for_user(ProviderKind::MySql, "alice", false, Some(5)),
                ConnectorConfiguration::for_organization(ProviderKind::MySql, "acme", true, Some(50)),
            ],
        )
        .unwrap();

        let alice = configurations.for_user(ProviderKind::MySql, "alice", Some("acme"));
        assert_eq!(alice.source, ConfigurationSource::User);
        assert!(!alice.enabled);
        assert_eq!(alice.max_rows, Some(5));

        let bob = configurations.for_user(ProviderKind::MySql, "bob", Some("acme"));
        assert_eq!(bob.source, ConfigurationSource::Organization);
        assert_eq!(bob.max_rows, Some(50));

        let carol = configurations.for_user(ProviderKind::MySql, "carol", None);
        assert_eq!(carol.source, ConfigurationSource::Default);
        assert_eq!(carol.max_rows, Some(1000));
    }

    #[test]
    fn test_unconfigured_provider_is_disabled() {
        let configurations = ConnectorConfigurations::new(defaults());
        let resolved = configurations.for_user(ProviderKind::Hive, "alice", None);
        assert!(!resolved.enabled);
        assert_eq!(resolved.max_rows, None);
    }

    #[test]
    fn test_user_and_organization_are_exclusive() {
        let mut record = ConnectorConfiguration::for_user(ProviderKind::MySql, "alice", true, None);
        record.organization_id = Some("acme".to_string());
        assert!(record.validate().is_err());

        record.user_id = None;
        record.organization_id = None;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_duplicate_records_rejected() {
        let mut configurations = ConnectorConfigurations::new(defaults());
        configurations
            .insert(ConnectorConfiguration::for_user(ProviderKind::MySql, "alice", true, None))
            .unwrap();
        let err = configurations
            .insert(ConnectorConfiguration::for_user(ProviderKind::MySql, "alice", false, None))
            .err()
            .unwrap();
        assert!(matches!(err, ImportError::ConnectorConfigInvalid(_)));
        configurations
            .insert(ConnectorConfiguration::for_user(ProviderKind::Postgres, "alice", true, None))
            .unwrap();
        assert_eq!(configurations.records().len(), 2);
    }

    #[test]
    fn test_remove() {
        let record = ConnectorConfiguration::for_organization(ProviderKind::Hive, "acme", true, None);
        let id = record.id;
        let mut configurations = ConnectorConfigurations::with_records(defaults(), vec![record]).unwrap();
        assert!(configurations.remove(id).is_some());
        assert!(configurations.records().is_empty());
    }

    #[test]
    fn test_records_from_json() {
        let record: ConnectorConfiguration = serde_json::from_str(
            r#"{"provider": "sqlserver", "organization_id": "acme", "enabled": true, "max_rows": 10}"#,
        )
        .unwrap();
        assert_eq!(record.provider, ProviderKind::SqlServer);
        assert!(record.validate().is_ok());
    }
}
