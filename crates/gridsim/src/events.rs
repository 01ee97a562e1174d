//! Events exchanged by grid entities.

// GRIDLET EVENTS //////////////////////////////////////////////////////////////////////////////////

pub mod gridlet {
    use serde::{Deserialize, Serialize};

    use gridsim_core::component::Id;

    use crate::gridlet::{Gridlet, GridletStatus};

    /// Submits a gridlet to a resource.
    #[derive(Clone, Serialize)]
    pub struct GridletSubmit {
        pub gridlet: Gridlet,
        /// Whether the resource should acknowledge the submission.
        pub ack: bool,
    }

    #[derive(Clone, Serialize)]
    pub struct GridletSubmitAck {
        pub gridlet_id: u64,
        pub user_id: Id,
        pub accepted: bool,
    }

    /// Gridlet sent back to its owner after reaching a terminal state.
    #[derive(Clone, Serialize)]
    pub struct GridletReturn {
        pub gridlet: Gridlet,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub enum GridletAction {
        Cancel,
        Pause,
        Resume,
        Move,
    }

    /// Cancels a gridlet. The cancelled gridlet is returned to the owner.
    #[derive(Clone, Serialize)]
    pub struct GridletCancel {
        pub gridlet_id: u64,
        pub user_id: Id,
    }

    #[derive(Clone, Serialize)]
    pub struct GridletPause {
        pub gridlet_id: u64,
        pub user_id: Id,
    }

    #[derive(Clone, Serialize)]
    pub struct GridletResume {
        pub gridlet_id: u64,
        pub user_id: Id,
    }

    /// Moves a gridlet with its progress to another resource.
    #[derive(Clone, Serialize)]
    pub struct GridletMove {
        pub gridlet_id: u64,
        pub user_id: Id,
        pub dst_resource: Id,
    }

    /// Result of pause, resume, move or cancel of an unknown gridlet.
    #[derive(Clone, Serialize)]
    pub struct GridletActionAck {
        pub gridlet_id: u64,
        pub user_id: Id,
        pub action: GridletAction,
        pub success: bool,
    }

    #[derive(Clone, Serialize)]
    pub struct GridletStatusRequest {
        pub transaction: u64,
        pub gridlet_id: u64,
        pub user_id: Id,
    }

    #[derive(Clone, Serialize)]
    pub struct GridletStatusReply {
        pub transaction: u64,
        pub gridlet_id: u64,
        pub user_id: Id,
        /// `None` if the resource does not hold the gridlet.
        pub status: Option<GridletStatus>,
    }
}

// RESOURCE EVENTS /////////////////////////////////////////////////////////////////////////////////

pub mod resource {
    use serde::Serialize;

    use gridsim_core::component::Id;

    use crate::characteristics::ResourceCharacteristics;

    #[derive(Clone, Serialize)]
    pub struct CharacteristicsRequest {
        pub transaction: u64,
    }

    #[derive(Clone, Serialize)]
    pub struct CharacteristicsReply {
        pub transaction: u64,
        pub resource_id: Id,
        pub characteristics: ResourceCharacteristics,
    }

    #[derive(Clone, Serialize)]
    pub struct DynamicInfoRequest {
        pub transaction: u64,
    }

    /// Current state of a resource.
    #[derive(Clone, Serialize)]
    pub struct DynamicInfoReply {
        pub transaction: u64,
        pub resource_id: Id,
        pub free_pe: u32,
        pub queued: usize,
        pub running: usize,
        pub load: f64,
    }

    #[derive(Clone, Serialize)]
    pub struct MachineFailure {
        pub machine_ids: Vec<u32>,
    }

    #[derive(Clone, Serialize)]
    pub struct MachineRecovery {
        pub machine_ids: Vec<u32>,
    }
}

// GIS EVENTS //////////////////////////////////////////////////////////////////////////////////////

pub mod gis {
    use serde::Serialize;

    use gridsim_core::component::Id;

    #[derive(Clone, Serialize)]
    pub struct RegisterResource {
        pub resource_id: Id,
        pub num_pe: u32,
        pub supports_reservation: bool,
    }

    #[derive(Clone, Serialize)]
    pub struct DeregisterResource {
        pub resource_id: Id,
    }

    #[derive(Clone, Serialize)]
    pub struct ResourceListRequest {
        pub transaction: u64,
        /// Return only resources supporting advance reservation.
        pub reservation_only: bool,
    }

    #[derive(Clone, Serialize)]
    pub struct ResourceList {
        pub transaction: u64,
        pub resources: Vec<Id>,
    }
}

// RESERVATION EVENTS //////////////////////////////////////////////////////////////////////////////

pub mod reservation {
    use serde::Serialize;

    use crate::error::ReservationError;
    use crate::reservation::ReservationStatus;

    /// Requests a new reservation. Zero `start_time` means "now".
    #[derive(Clone, Serialize)]
    pub struct ReservationCreate {
        pub transaction: u64,
        pub start_time: f64,
        pub duration: f64,
        pub num_pe: u32,
    }

    #[derive(Clone, Serialize)]
    pub struct ReservationCreated {
        pub transaction: u64,
        /// Reservation id or rejection reason.
        pub result: Result<u64, ReservationError>,
        pub expiry_time: Option<f64>,
    }

    #[derive(Clone, Serialize)]
    pub struct ReservationCommit {
        pub transaction: u64,
        pub reservation_id: u64,
    }

    #[derive(Clone, Serialize)]
    pub struct ReservationCancel {
        pub transaction: u64,
        pub reservation_id: u64,
    }

    #[derive(Clone, Serialize)]
    pub struct ReservationQuery {
        pub transaction: u64,
        pub reservation_id: u64,
    }

    /// Reply to commit, cancel and query requests.
    #[derive(Clone, Serialize)]
    pub struct ReservationReply {
        pub transaction: u64,
        pub reservation_id: u64,
        pub result: Result<ReservationStatus, ReservationError>,
    }
}

// USER EVENTS /////////////////////////////////////////////////////////////////////////////////////

pub mod user {
    use serde::Serialize;

    #[derive(Clone, Serialize)]
    pub struct StartUser {}
}
