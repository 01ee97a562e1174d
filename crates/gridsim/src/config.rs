//! Simulation configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::characteristics::AllocPolicyKind;
use crate::error::ConfigError;
use crate::failure::FailureModel;
use crate::user::ReservationRequest;

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawSimulationConfig {
    pub seed: Option<u64>,
    pub network_latency: Option<f64>,
    pub reservation_expiry: Option<f64>,
    pub resources: Option<Vec<ResourceConfig>>,
    pub users: Option<Vec<UserConfig>>,
    pub failures: Option<FailureModel>,
    pub scheduled_failures: Option<Vec<ScheduledFailure>>,
}

/// Holds configuration of a single resource or a set of identical resources.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ResourceConfig {
    /// Resource name.
    /// Should be set if count = 1.
    pub name: Option<String>,
    /// Resource name prefix.
    /// Full name is produced by appending resource instance number to the prefix.
    /// Should be set if count > 1.
    pub name_prefix: Option<String>,
    /// Number of such resources.
    pub count: Option<u32>,
    pub architecture: Option<String>,
    pub os: Option<String>,
    pub machines: u32,
    pub pes_per_machine: u32,
    /// MIPS rating of one PE.
    pub mips: f64,
    pub policy: AllocPolicyKind,
    /// Price of one second of processing.
    pub cost_per_sec: Option<f64>,
    /// Offset from GMT in hours.
    pub time_zone: Option<f64>,
    /// Bytes per second of the resource link.
    pub baud_rate: Option<f64>,
    pub peak_load: Option<f64>,
    pub off_peak_load: Option<f64>,
    pub holiday_load: Option<f64>,
    pub weekends: Option<Vec<u32>>,
    pub holidays: Option<Vec<u32>>,
}

/// Holds configuration of a single user or a set of identical users.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct UserConfig {
    /// User name.
    /// Should be set if count = 1.
    pub name: Option<String>,
    /// User name prefix.
    /// Should be set if count > 1.
    pub name_prefix: Option<String>,
    /// Number of such users.
    pub count: Option<u32>,
    /// Number of gridlets of each user.
    pub gridlets: u32,
    /// Gridlet length in MI.
    pub length: f64,
    /// Relative deviation of gridlet lengths, lengths are drawn uniformly from
    /// `length * [1 - deviation, 1 + deviation]`.
    pub length_deviation: Option<f64>,
    pub file_size: Option<u64>,
    pub output_size: Option<u64>,
    pub num_pe: Option<u32>,
    pub baud_rate: Option<f64>,
    /// Time when the user starts.
    pub start_time: Option<f64>,
    pub reservation: Option<ReservationRequest>,
    pub resubmit_failed: Option<bool>,
    pub max_resubmissions: Option<u32>,
    pub retry_interval: Option<f64>,
    /// Ask resources to acknowledge submitted gridlets.
    pub acknowledge_submissions: Option<bool>,
}

/// Failure of given machines at a fixed time.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ScheduledFailure {
    /// Resource name.
    pub resource: String,
    pub machines: Vec<u32>,
    pub time: f64,
    /// Machines are recovered after this delay if set.
    pub repair_after: Option<f64>,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// Seed of the random number generator.
    pub seed: u64,
    /// Latency in seconds added to every message between entities.
    pub network_latency: f64,
    /// Time in seconds after which uncommitted reservations expire.
    pub reservation_expiry: f64,
    pub resources: Vec<ResourceConfig>,
    pub users: Vec<UserConfig>,
    /// Random failure injection, disabled if not set.
    pub failures: Option<FailureModel>,
    pub scheduled_failures: Vec<ScheduledFailure>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::from_raw(RawSimulationConfig {
            seed: None,
            network_latency: None,
            reservation_expiry: None,
            resources: None,
            users: None,
            failures: None,
            scheduled_failures: None,
        })
    }
}

impl SimulationConfig {
    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        content.parse()
    }

    fn from_raw(raw: RawSimulationConfig) -> Self {
        Self {
            seed: raw.seed.unwrap_or(123),
            network_latency: raw.network_latency.unwrap_or(0.),
            reservation_expiry: raw.reservation_expiry.unwrap_or(1800.),
            resources: raw.resources.unwrap_or_default(),
            users: raw.users.unwrap_or_default(),
            failures: raw.failures,
            scheduled_failures: raw.scheduled_failures.unwrap_or_default(),
        }
    }

    /// Checks values which cannot be corrected by defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("network latency", self.network_latency)?;
        non_negative("reservation expiry", self.reservation_expiry)?;
        for resource in self.resources.iter() {
            instance_names(&resource.name, &resource.name_prefix, resource.count)?;
            let name = display_name(&resource.name, &resource.name_prefix);
            if resource.machines == 0 || resource.pes_per_machine == 0 || resource.mips <= 0. {
                return Err(ConfigError::Invalid(format!(
                    "resource {} must have machines with PEs of positive MIPS",
                    name
                )));
            }
            non_negative(&format!("cost per second of resource {}", name), resource.cost_per_sec.unwrap_or(0.))?;
            non_negative(&format!("baud rate of resource {}", name), resource.baud_rate.unwrap_or(0.))?;
        }
        for user in self.users.iter() {
            instance_names(&user.name, &user.name_prefix, user.count)?;
            let name = display_name(&user.name, &user.name_prefix);
            if user.length <= 0. {
                return Err(ConfigError::Invalid(format!("gridlet length of user {} must be positive", name)));
            }
            non_negative(&format!("length deviation of user {}", name), user.length_deviation.unwrap_or(0.))?;
            non_negative(&format!("baud rate of user {}", name), user.baud_rate.unwrap_or(0.))?;
            non_negative(&format!("start time of user {}", name), user.start_time.unwrap_or(0.))?;
            if let Some(interval) = user.retry_interval {
                positive(&format!("retry interval of user {}", name), interval)?;
            }
            if let Some(reservation) = &user.reservation {
                non_negative(&format!("reservation start of user {}", name), reservation.start_time)?;
                positive(&format!("reservation duration of user {}", name), reservation.duration)?;
                if reservation.num_pe == 0 {
                    return Err(ConfigError::Invalid(format!("reservation of user {} must hold PEs", name)));
                }
            }
        }
        for failure in self.scheduled_failures.iter() {
            let known = self.resources.iter().any(|r| {
                instance_names(&r.name, &r.name_prefix, r.count)
                    .map_or(false, |names| names.contains(&failure.resource))
            });
            if !known {
                return Err(ConfigError::Invalid(format!(
                    "scheduled failure refers to unknown resource {}",
                    failure.resource
                )));
            }
            non_negative(&format!("failure time of {}", failure.resource), failure.time)?;
            if let Some(repair_after) = failure.repair_after {
                non_negative(&format!("repair delay of {}", failure.resource), repair_after)?;
            }
        }
        if let Some(model) = &self.failures {
            positive("mean time between failures", model.mean_time_between_failures)?;
            positive("mean repair time", model.mean_repair_time)?;
            non_negative("failure injection end", model.until)?;
        }
        Ok(())
    }
}

fn non_negative(what: &str, value: f64) -> Result<(), ConfigError> {
    // also rejects NaN
    if value >= 0. {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be non-negative, got {}", what, value)))
    }
}

fn positive(what: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0. {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be positive, got {}", what, value)))
    }
}

impl FromStr for SimulationConfig {
    type Err = ConfigError;

    /// Parses config from YAML string and validates it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawSimulationConfig = serde_yaml::from_str(s)?;
        let config = Self::from_raw(raw);
        config.validate()?;
        Ok(config)
    }
}

fn display_name(name: &Option<String>, name_prefix: &Option<String>) -> String {
    name.clone()
        .or_else(|| name_prefix.clone())
        .unwrap_or_else(|| "<unnamed>".to_string())
}

/// Expands `name` or `name_prefix` with `count` into instance names.
pub fn instance_names(
    name: &Option<String>,
    name_prefix: &Option<String>,
    count: Option<u32>,
) -> Result<Vec<String>, ConfigError> {
    let count = count.unwrap_or(1);
    match (name, name_prefix) {
        (Some(name), _) if count == 1 => Ok(vec![name.clone()]),
        (_, Some(prefix)) => Ok((0..count).map(|i| format!("{}{}", prefix, i)).collect()),
        (Some(name), None) => Err(ConfigError::Invalid(format!(
            "name_prefix should be set instead of name for {} instances of {}",
            count, name
        ))),
        (None, None) => Err(ConfigError::Invalid("either name or name_prefix should be set".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_expanded() {
        assert_eq!(instance_names(&Some("r".into()), &None, None).unwrap(), vec!["r"]);
        assert_eq!(
            instance_names(&None, &Some("r".into()), Some(3)).unwrap(),
            vec!["r0", "r1", "r2"]
        );
        assert!(instance_names(&Some("r".into()), &None, Some(2)).is_err());
        assert!(instance_names(&None, &None, None).is_err());
    }

    #[test]
    fn defaults_are_applied() {
        let config: SimulationConfig = "resources: []".parse().unwrap();
        assert_eq!(config.seed, 123);
        assert_eq!(config.reservation_expiry, 1800.);
        assert!(config.users.is_empty());
        assert!(config.failures.is_none());
    }

    #[test]
    fn negative_times_are_rejected() {
        let configs = [
            "reservation_expiry: -1",
            "users: [{name: u, gridlets: 1, length: 10, start_time: -5}]",
            "users: [{name: u, gridlets: 1, length: 10, retry_interval: 0}]",
            "users: [{name: u, gridlets: 1, length: 10, baud_rate: -1}]",
            "users: [{name: u, gridlets: 1, length: 10, reservation: {start_time: 0, duration: -10, num_pe: 1}}]",
            "resources: [{name: r, machines: 1, pes_per_machine: 1, mips: 10, policy: SpaceShared, baud_rate: -1}]",
            "resources: [{name: r, machines: 1, pes_per_machine: 1, mips: 10, policy: SpaceShared}]
scheduled_failures: [{resource: r, machines: [0], time: 5, repair_after: -2}]",
            "failures: {mean_time_between_failures: 10, mean_repair_time: 5, max_failed_machines: 1, until: -1}",
        ];
        for yaml in configs {
            let result = yaml.parse::<SimulationConfig>();
            assert!(matches!(result, Err(ConfigError::Invalid(_))), "accepted: {}", yaml);
        }
    }
}
