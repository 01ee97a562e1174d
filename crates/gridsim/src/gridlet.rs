//! Gridlet: a unit of work submitted by a user to a grid resource.

use serde::{Deserialize, Serialize};

use gridsim_core::component::Id;

use crate::error::GridletError;

/// Gridlet lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridletStatus {
    /// Created by the user, not submitted yet.
    Created,
    /// Submitted, in transit to a resource.
    Ready,
    /// Waiting in the resource queue.
    Queued,
    /// Being executed.
    InExec,
    /// Finished successfully.
    Success,
    /// Failed (e.g. its reservation has ended or is unknown).
    Failed,
    /// Cancelled by the owner.
    Canceled,
    /// Paused by the owner, keeps its progress.
    Paused,
    /// Resumed after a pause, waiting to run again.
    Resumed,
    /// Lost because the machine running it has failed.
    FailedResourceUnavailable,
}

impl GridletStatus {
    /// Returns `true` if the gridlet cannot change state anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GridletStatus::Success
                | GridletStatus::Failed
                | GridletStatus::Canceled
                | GridletStatus::FailedResourceUnavailable
        )
    }
}

/// Accounting record of a gridlet stay on one resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceRecord {
    pub resource_id: Id,
    pub resource_name: String,
    pub cost_per_sec: f64,
    pub arrival_time: f64,
    pub exec_start_time: Option<f64>,
    pub finish_time: Option<f64>,
    pub wall_clock_time: f64,
    pub actual_cpu_time: f64,
    pub finished_so_far: f64,
}

/// Job submitted by a user entity to a resource entity for processing.
#[derive(Clone, Debug, Serialize)]
pub struct Gridlet {
    id: u64,
    user_id: Id,
    /// Length in millions of instructions (MI).
    length: f64,
    /// Input size in bytes, transferred to the resource before execution.
    file_size: u64,
    /// Output size in bytes, transferred back to the user.
    output_size: u64,
    num_pe: u32,
    status: GridletStatus,
    reservation_id: Option<u64>,
    history: Vec<ResourceRecord>,
}

impl Gridlet {
    pub fn new(id: u64, user_id: Id, length: f64, file_size: u64, output_size: u64) -> Self {
        Self {
            id,
            user_id,
            length,
            file_size,
            output_size,
            num_pe: 1,
            status: GridletStatus::Created,
            reservation_id: None,
            history: Vec::new(),
        }
    }

    /// Sets the number of PEs the gridlet needs (at least 1).
    pub fn with_num_pe(mut self, num_pe: u32) -> Self {
        self.num_pe = num_pe.max(1);
        self
    }

    /// Binds the gridlet to an advance reservation.
    pub fn with_reservation(mut self, reservation_id: u64) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> Id {
        self.user_id
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn output_size(&self) -> u64 {
        self.output_size
    }

    pub fn num_pe(&self) -> u32 {
        self.num_pe
    }

    pub fn status(&self) -> GridletStatus {
        self.status
    }

    pub fn reservation_id(&self) -> Option<u64> {
        self.reservation_id
    }

    pub fn set_reservation_id(&mut self, reservation_id: Option<u64>) {
        self.reservation_id = reservation_id;
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Changes the gridlet status.
    ///
    /// Leaving a terminal state is an error. When the gridlet enters a terminal state on a resource,
    /// the finish time and wall clock time of the current resource record are set.
    pub fn set_status(&mut self, status: GridletStatus, time: f64) -> Result<(), GridletError> {
        if self.status.is_terminal() && self.status != status {
            return Err(GridletError::InvalidTransition {
                gridlet_id: self.id,
                from: self.status,
                to: status,
            });
        }
        if status == GridletStatus::InExec {
            if let Some(record) = self.history.last_mut() {
                record.exec_start_time.get_or_insert(time);
            }
        }
        if status.is_terminal() && !self.status.is_terminal() {
            if let Some(record) = self.history.last_mut() {
                record.finish_time = Some(time);
                record.wall_clock_time = time - record.arrival_time;
            }
        }
        self.status = status;
        Ok(())
    }

    /// Brings a gridlet lost with a failed resource back to `Created` so it can be submitted again.
    ///
    /// The work done before the failure is kept.
    pub fn reset_for_resubmission(&mut self) -> Result<(), GridletError> {
        if self.status != GridletStatus::FailedResourceUnavailable {
            return Err(GridletError::InvalidTransition {
                gridlet_id: self.id,
                from: self.status,
                to: GridletStatus::Created,
            });
        }
        self.status = GridletStatus::Created;
        Ok(())
    }

    /// Starts a new accounting record when the gridlet arrives at a resource.
    pub fn set_resource_parameter(&mut self, resource_id: Id, resource_name: &str, cost_per_sec: f64, time: f64) {
        let finished_so_far = self.finished_so_far();
        self.history.push(ResourceRecord {
            resource_id,
            resource_name: resource_name.to_owned(),
            cost_per_sec,
            arrival_time: time,
            exec_start_time: None,
            finish_time: None,
            wall_clock_time: 0.,
            actual_cpu_time: 0.,
            finished_so_far,
        });
    }

    /// Records the processing progress (in MI) and consumed CPU time on the current resource.
    pub fn set_progress(&mut self, finished_so_far: f64, cpu_time: f64) {
        if let Some(record) = self.history.last_mut() {
            record.finished_so_far = finished_so_far.min(self.length);
            record.actual_cpu_time = cpu_time;
        }
    }

    /// Returns the amount of work done so far (in MI).
    pub fn finished_so_far(&self) -> f64 {
        self.history.last().map_or(0., |r| r.finished_so_far)
    }

    /// Returns the amount of work left (in MI).
    pub fn remaining_length(&self) -> f64 {
        (self.length - self.finished_so_far()).max(0.)
    }

    /// Returns the resource currently (or last) processing the gridlet.
    pub fn resource_id(&self) -> Option<Id> {
        self.history.last().map(|r| r.resource_id)
    }

    pub fn current_record(&self) -> Option<&ResourceRecord> {
        self.history.last()
    }

    pub fn history(&self) -> &[ResourceRecord] {
        &self.history
    }

    /// CPU time consumed on the current resource.
    pub fn actual_cpu_time(&self) -> f64 {
        self.history.last().map_or(0., |r| r.actual_cpu_time)
    }

    /// Wall clock time spent on the current resource.
    pub fn wall_clock_time(&self) -> f64 {
        self.history.last().map_or(0., |r| r.wall_clock_time)
    }

    pub fn exec_start_time(&self) -> Option<f64> {
        self.history.last().and_then(|r| r.exec_start_time)
    }

    pub fn finish_time(&self) -> Option<f64> {
        self.history.last().and_then(|r| r.finish_time)
    }

    /// Processing cost over all visited resources.
    pub fn processing_cost(&self) -> f64 {
        self.history.iter().map(|r| r.actual_cpu_time * r.cost_per_sec).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_cannot_be_left() {
        let mut gridlet = Gridlet::new(1, 0, 100., 10, 10);
        gridlet.set_resource_parameter(3, "r", 2., 0.);
        gridlet.set_status(GridletStatus::InExec, 1.).unwrap();
        gridlet.set_status(GridletStatus::Success, 5.).unwrap();
        assert!(gridlet.set_status(GridletStatus::Queued, 6.).is_err());
        assert!(gridlet.set_status(GridletStatus::Success, 6.).is_ok());
        assert_eq!(gridlet.finish_time(), Some(5.));
        assert_eq!(gridlet.exec_start_time(), Some(1.));
        assert_eq!(gridlet.wall_clock_time(), 5.);
    }

    #[test]
    fn progress_and_cost_accumulate_over_resources() {
        let mut gridlet = Gridlet::new(1, 0, 100., 10, 10);
        gridlet.set_resource_parameter(3, "r1", 2., 0.);
        gridlet.set_progress(40., 4.);
        assert_eq!(gridlet.remaining_length(), 60.);
        gridlet.set_resource_parameter(4, "r2", 1., 10.);
        assert_eq!(gridlet.finished_so_far(), 40.);
        gridlet.set_progress(100., 6.);
        assert_eq!(gridlet.remaining_length(), 0.);
        assert_eq!(gridlet.processing_cost(), 4. * 2. + 6. * 1.);
        assert_eq!(gridlet.resource_id(), Some(4));
        assert_eq!(gridlet.history().len(), 2);
    }

    #[test]
    fn num_pe_is_at_least_one() {
        let gridlet = Gridlet::new(1, 0, 100., 10, 10).with_num_pe(0);
        assert_eq!(gridlet.num_pe(), 1);
    }
}
