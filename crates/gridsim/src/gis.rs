//! Grid information service: directory of available resources.

use indexmap::IndexMap;

use gridsim_core::cast;
use gridsim_core::component::Id;
use gridsim_core::context::SimulationContext;
use gridsim_core::event::Event;
use gridsim_core::handler::EventHandler;
use gridsim_core::{log_debug, log_warn};

use crate::events::gis::{DeregisterResource, RegisterResource, ResourceList, ResourceListRequest};

/// Registered resource as seen by the GIS.
#[derive(Clone, Debug)]
pub struct ResourceEntry {
    pub num_pe: u32,
    pub supports_reservation: bool,
}

/// Registry which resources register with and users query to discover resources.
///
/// Resources are listed in registration order.
pub struct GridInformationService {
    resources: IndexMap<Id, ResourceEntry>,
    network_latency: f64,
    ctx: SimulationContext,
}

impl GridInformationService {
    pub fn new(network_latency: f64, ctx: SimulationContext) -> Self {
        Self {
            resources: IndexMap::new(),
            network_latency,
            ctx,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Returns ids of registered resources.
    pub fn resources(&self) -> Vec<Id> {
        self.resources.keys().copied().collect()
    }

    /// Returns ids of registered resources supporting advance reservation.
    pub fn reservation_resources(&self) -> Vec<Id> {
        self.resources
            .iter()
            .filter(|(_, entry)| entry.supports_reservation)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn entry(&self, resource_id: Id) -> Option<&ResourceEntry> {
        self.resources.get(&resource_id)
    }

    pub fn total_pes(&self) -> u32 {
        self.resources.values().map(|entry| entry.num_pe).sum()
    }
}

impl EventHandler for GridInformationService {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            RegisterResource {
                resource_id,
                num_pe,
                supports_reservation,
            } => {
                log_debug!(self.ctx, "registered {}", self.ctx.lookup_name(resource_id));
                self.resources.insert(
                    resource_id,
                    ResourceEntry {
                        num_pe,
                        supports_reservation,
                    },
                );
            }
            DeregisterResource { resource_id } => {
                if self.resources.shift_remove(&resource_id).is_some() {
                    log_debug!(self.ctx, "deregistered {}", self.ctx.lookup_name(resource_id));
                } else {
                    log_warn!(self.ctx, "unknown resource {} deregistered", resource_id);
                }
            }
            ResourceListRequest {
                transaction,
                reservation_only,
            } => {
                let resources = if reservation_only {
                    self.reservation_resources()
                } else {
                    self.resources()
                };
                self.ctx.emit(
                    ResourceList {
                        transaction,
                        resources,
                    },
                    event.src,
                    self.network_latency,
                );
            }
        })
    }
}
