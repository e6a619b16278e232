use tracing::debug;

use super::model::{TcpHost, WeightedDestination};
use crate::{
    common::{api::TCPRoute, BackendRefKey, ResourceKey},
    references_resolver::{FromResourceKey, ReferenceResolver},
    reports::{ReportCondition, ReportMap},
    routes_resolver::AttachedRoute,
    state::ResourceStore,
};

/// Turns the TCPRoutes attached to a listener into TCP hosts, one per rule with at
/// least one resolved destination.
pub struct TCPRouteTranslator<'a, S> {
    references: ReferenceResolver<'a, S>,
}

impl<'a, S: ResourceStore> TCPRouteTranslator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { references: ReferenceResolver::new(store) }
    }

    /// Service references without a port forward to `listener_port`.
    pub fn translate(&self, attached: &AttachedRoute<TCPRoute>, listener_port: i32, reports: &mut ReportMap) -> Vec<TcpHost> {
        let key = ResourceKey::from(attached.route.as_ref());
        let from = FromResourceKey::tcp_route(&key.namespace);
        let conditions = reports.parent_ref(&key, &attached.parent_ref);

        let mut hosts = vec![];
        for (rule_index, rule) in attached.route.spec.rules.iter().enumerate() {
            let mut destinations = vec![];
            for backend_ref in rule.backend_refs.iter().flatten() {
                let backend_key = BackendRefKey::new(backend_ref, &key.namespace);
                match self.references.resolve_backend(&from, &backend_key) {
                    Ok(backend) => destinations.push(WeightedDestination {
                        cluster_name: backend.cluster_name(Some(backend_key.port.unwrap_or(listener_port))),
                        weight: backend_ref.weight.unwrap_or(1),
                    }),
                    Err(e) => {
                        debug!("Route {key}: {backend_key} not resolved: {e}");
                        conditions.set_if_absent(ReportCondition::resolve_error(&e));
                    },
                }
            }

            if destinations.is_empty() {
                debug!("Route {key}: rule {rule_index} has no destinations");
                continue;
            }
            hosts.push(TcpHost { name: format!("{}-{}-{}-{rule_index}", key.kind.to_lowercase(), key.name, key.namespace), destinations });
        }
        hosts
    }
}
