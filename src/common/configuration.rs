use serde::Deserialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::Result;

pub const DEFAULT_PRIVILEGED_PORT_OFFSET: i32 = 8000;
pub const DEFAULT_BIND_ADDRESS: &str = "::";
const MAX_PORT: i32 = 65535;
const MAX_PRIVILEGED_PORT: i32 = 1023;

#[derive(Clone, Debug, Default, TypedBuilder, Deserialize)]
pub struct DelegationPolicy {
    #[builder(default)]
    #[serde(default)]
    pub allow_wildcard_namespace: bool,
}

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
pub struct Configuration {
    #[builder(setter(into))]
    pub controller_name: String,
    #[builder(default)]
    #[serde(default)]
    pub delegation: DelegationPolicy,
    #[builder(default = DEFAULT_PRIVILEGED_PORT_OFFSET)]
    #[serde(default = "default_privileged_port_offset")]
    pub privileged_port_offset: i32,
    #[builder(default = DEFAULT_BIND_ADDRESS.to_owned(), setter(into))]
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_privileged_port_offset() -> i32 {
    DEFAULT_PRIVILEGED_PORT_OFFSET
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_owned()
}

#[derive(Error, Debug)]
enum ConfigurationError {
    #[error("controller name must be not empty")]
    ControllerName,
    #[error("controller name must be prefixed with a domain, e.g. kubvernor.com/proxy-controller")]
    ControllerNameDomain,
    #[error("privileged port offset {0} must keep ports 1-1023 within 1024-65535")]
    PrivilegedPortOffset(i32),
}

impl Configuration {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let configuration: Configuration = serde_yaml::from_str(content)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<()> {
        let offset = self.privileged_port_offset;
        if offset < MAX_PRIVILEGED_PORT || offset > MAX_PORT - MAX_PRIVILEGED_PORT {
            return Err(ConfigurationError::PrivilegedPortOffset(offset).into());
        }
        if self.controller_name.is_empty() {
            return Err(ConfigurationError::ControllerName.into());
        }
        match self.controller_name.split_once('/') {
            Some((domain, path)) if domain.contains('.') && !path.is_empty() => Ok(()),
            _ => Err(ConfigurationError::ControllerNameDomain.into()),
        }
    }

    /// Port the proxy binds for a listener port, moving privileged ports out of the
    /// reserved range. Offsets accepted by [`Configuration::validate`] never overflow.
    pub fn bind_port(&self, port: i32) -> i32 {
        if port <= MAX_PRIVILEGED_PORT {
            port.saturating_add(self.privileged_port_offset)
        } else {
            port
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_defaults() {
        let configuration = Configuration::from_yaml("controller_name: kubvernor.com/proxy-controller").unwrap();
        assert_eq!(configuration.privileged_port_offset, 8000);
        assert_eq!(configuration.bind_address, "::");
        assert!(!configuration.delegation.allow_wildcard_namespace);
        assert_eq!(configuration.bind_port(80), 8080);
        assert_eq!(configuration.bind_port(8443), 8443);
    }

    #[test]
    fn test_configuration_validation() {
        assert!(Configuration::from_yaml("controller_name: \"\"").is_err());
        assert!(Configuration::from_yaml("controller_name: proxy-controller").is_err());
        let configuration = Configuration::from_yaml(
            r"
controller_name: kubvernor.com/proxy-controller
delegation:
  allow_wildcard_namespace: true
privileged_port_offset: 10000
",
        )
        .unwrap();
        assert!(configuration.delegation.allow_wildcard_namespace);
        assert_eq!(configuration.bind_port(443), 10443);
    }

    #[test]
    fn test_configuration_builder() {
        let configuration = Configuration::builder().controller_name("kubvernor.com/proxy-controller").build();
        assert!(configuration.validate().is_ok());
        assert_eq!(configuration.bind_address, DEFAULT_BIND_ADDRESS);
    }

    #[test]
    fn test_privileged_port_offset_bounds() {
        let with_offset = |offset: &str| Configuration::from_yaml(&format!("controller_name: kubvernor.com/proxy-controller\nprivileged_port_offset: {offset}"));
        assert!(with_offset("2147483647").is_err());
        assert!(with_offset("-8000").is_err());
        assert!(with_offset("0").is_err());
        assert!(with_offset("64513").is_err());
        let configuration = with_offset("64512").unwrap();
        assert_eq!(configuration.bind_port(1023), 65535);
        assert_eq!(configuration.bind_port(1), 64513);

        let configuration = Configuration::builder().controller_name("kubvernor.com/proxy-controller").privileged_port_offset(i32::MAX).build();
        assert!(configuration.validate().is_err());
        assert_eq!(configuration.bind_port(80), i32::MAX);
    }
}
