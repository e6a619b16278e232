use eater_domainmatcher::DomainPattern;
use tracing::{debug, warn};

use crate::common::DEFAULT_ROUTE_HOSTNAME;

/// Intersects a listener hostname with the hostnames declared by a route.
pub struct HostnameMatchFilter<'a> {
    listener_hostname: Option<&'a str>,
    route_hostnames: &'a [String],
}

fn wildcard_pattern(hostname: &str) -> String {
    if let Some(stripped) = hostname.strip_prefix("*.") {
        format! {"**+.{stripped}"}
    } else {
        hostname.to_owned()
    }
}

impl<'a> HostnameMatchFilter<'a> {
    pub fn new(listener_hostname: Option<&'a str>, route_hostnames: &'a [String]) -> Self {
        Self { listener_hostname, route_hostnames }
    }

    /// Hostnames the route serves on this listener. An empty list means every
    /// hostname; `None` means the route does not attach to the listener at all.
    pub fn intersect(&self) -> Option<Vec<String>> {
        let listener_hostname = match self.listener_hostname {
            Some(hostname) if !hostname.is_empty() && hostname != DEFAULT_ROUTE_HOSTNAME => hostname,
            _ => return Some(self.route_hostnames.to_vec()),
        };

        if self.route_hostnames.is_empty() || self.route_hostnames.iter().any(|h| h == DEFAULT_ROUTE_HOSTNAME) {
            return Some(vec![listener_hostname.to_owned()]);
        }

        let pattern = wildcard_pattern(listener_hostname);
        let Ok(listener_pattern) = DomainPattern::<'_, '.'>::try_from(pattern.as_str()) else {
            warn!("Hostname is not a valid domain {listener_hostname}");
            return None;
        };

        let mut matched: Vec<String> = vec![];
        let mut covers_listener = false;
        for route_hostname in self.route_hostnames {
            if route_hostname == listener_hostname {
                covers_listener = true;
            } else if listener_hostname.starts_with("*.") && listener_pattern.matches(route_hostname) {
                debug!("Comparing hostnames {listener_hostname} {route_hostname} true");
                matched.push(route_hostname.clone());
            } else if route_hostname.starts_with("*.") {
                let route_pattern = wildcard_pattern(route_hostname);
                if let Ok(route_pattern) = DomainPattern::<'_, '.'>::try_from(route_pattern.as_str()) {
                    let res = route_pattern.matches(listener_hostname);
                    debug!("Comparing wildcarded hostnames {listener_hostname} {route_hostname} {res}");
                    covers_listener |= res;
                }
            }
        }

        if covers_listener {
            matched.insert(0, listener_hostname.to_owned());
        }
        matched.dedup();
        if matched.is_empty() {
            None
        } else {
            Some(matched)
        }
    }
}
