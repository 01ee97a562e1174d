//! Advance reservation bookkeeping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use gridsim_core::component::Id;
use gridsim_core::EPSILON;

use crate::error::ReservationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Accepted but not yet confirmed by the user, expires if not committed in time.
    NotCommitted,
    /// Confirmed, waiting for the start time.
    Committed,
    /// Holding its PEs.
    Active,
    /// Reserved period is over.
    Completed,
    /// Cancelled by the user.
    Canceled,
    /// Not committed before its expiry time or start.
    Expired,
}

impl ReservationStatus {
    /// Returns `true` if the reservation still claims capacity.
    pub fn is_alive(&self) -> bool {
        matches!(
            self,
            ReservationStatus::NotCommitted | ReservationStatus::Committed | ReservationStatus::Active
        )
    }
}

/// Reservation of PEs on a resource for a time window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reservation {
    pub id: u64,
    pub user_id: Id,
    pub start_time: f64,
    pub duration: f64,
    pub num_pe: u32,
    pub status: ReservationStatus,
    /// Time after which an uncommitted reservation is dropped.
    pub expiry_time: f64,
}

impl Reservation {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    fn overlaps(&self, from: f64, to: f64) -> bool {
        self.start_time < to && from < self.end_time()
    }
}

/// All reservations of a resource with admission control.
pub struct ReservationBook {
    reservations: IndexMap<u64, Reservation>,
    next_id: u64,
    expiry_period: f64,
}

impl ReservationBook {
    pub fn new(expiry_period: f64) -> Self {
        Self {
            reservations: IndexMap::new(),
            next_id: 0,
            expiry_period,
        }
    }

    pub fn get(&self, id: u64) -> Option<&Reservation> {
        self.reservations.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    pub fn set_status(&mut self, id: u64, status: ReservationStatus) {
        if let Some(r) = self.reservations.get_mut(&id) {
            r.status = status;
        }
    }

    /// Maximum number of PEs claimed at the same time by live reservations within `[from, to)`.
    pub fn reserved_pes(&self, from: f64, to: f64) -> u32 {
        let mut changes: Vec<(f64, i64)> = Vec::new();
        for r in self.reservations.values() {
            if r.status.is_alive() && r.overlaps(from, to) {
                changes.push((r.start_time.max(from), r.num_pe as i64));
                changes.push((r.end_time().min(to), -(r.num_pe as i64)));
            }
        }
        // releases go before claims at the same instant since windows are half-open
        changes.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut current = 0i64;
        let mut peak = 0i64;
        for (_, delta) in changes {
            current += delta;
            peak = peak.max(current);
        }
        peak as u32
    }

    /// Number of PEs that can still be reserved for the whole window `[from, to)`.
    pub fn available_pes(&self, from: f64, to: f64, total_pe: u32) -> u32 {
        total_pe.saturating_sub(self.reserved_pes(from, to))
    }

    /// Admits a new reservation.
    ///
    /// A zero `start_time` means "now". The new reservation is not committed and expires after
    /// the configured period.
    pub fn create(
        &mut self,
        user_id: Id,
        start_time: f64,
        duration: f64,
        num_pe: u32,
        total_pe: u32,
        now: f64,
    ) -> Result<&Reservation, ReservationError> {
        let start_time = if start_time == 0. { now } else { start_time };
        if start_time < now - EPSILON {
            return Err(ReservationError::StartInPast { start_time, now });
        }
        if duration <= 0. {
            return Err(ReservationError::InvalidDuration { duration });
        }
        if num_pe == 0 {
            return Err(ReservationError::NoPes);
        }
        if num_pe > total_pe {
            return Err(ReservationError::TooManyPes {
                requested: num_pe,
                total: total_pe,
            });
        }
        let available = self.available_pes(start_time, start_time + duration, total_pe);
        if available < num_pe {
            return Err(ReservationError::Busy {
                requested: num_pe,
                available,
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        let reservation = Reservation {
            id,
            user_id,
            start_time,
            duration,
            num_pe,
            status: ReservationStatus::NotCommitted,
            expiry_time: now + self.expiry_period,
        };
        Ok(&*self.reservations.entry(id).or_insert(reservation))
    }

    fn owned_mut(&mut self, id: u64, user_id: Id) -> Result<&mut Reservation, ReservationError> {
        match self.reservations.get_mut(&id) {
            None => Err(ReservationError::NotFound { id }),
            Some(r) if r.user_id != user_id => Err(ReservationError::NotOwner { id }),
            Some(r) => Ok(r),
        }
    }

    /// Confirms a reservation.
    pub fn commit(&mut self, id: u64, user_id: Id) -> Result<&Reservation, ReservationError> {
        let r = self.owned_mut(id, user_id)?;
        match r.status {
            ReservationStatus::NotCommitted => {
                r.status = ReservationStatus::Committed;
                Ok(&*r)
            }
            ReservationStatus::Committed | ReservationStatus::Active => Ok(&*r),
            status => Err(ReservationError::InvalidStatus { id, status }),
        }
    }

    /// Cancels a live reservation, returns its previous status.
    pub fn cancel(&mut self, id: u64, user_id: Id) -> Result<ReservationStatus, ReservationError> {
        let r = self.owned_mut(id, user_id)?;
        if !r.status.is_alive() {
            return Err(ReservationError::InvalidStatus { id, status: r.status });
        }
        let previous = r.status;
        r.status = ReservationStatus::Canceled;
        Ok(previous)
    }

    pub fn query(&self, id: u64, user_id: Id) -> Result<ReservationStatus, ReservationError> {
        match self.reservations.get(&id) {
            None => Err(ReservationError::NotFound { id }),
            Some(r) if r.user_id != user_id => Err(ReservationError::NotOwner { id }),
            Some(r) => Ok(r.status),
        }
    }
}
