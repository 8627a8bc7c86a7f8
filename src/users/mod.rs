//! User identity management
//!
//! [`UserMutator`] adds and removes identities across inbounds while keeping
//! the state tracker's membership map in step with the engine.

mod locks;
mod mutator;
mod request;

pub use locks::TagLocks;
pub use mutator::UserMutator;
pub use request::{
    AddUserRequest, AddUsersRequest, BatchInbound, BatchUser, BatchUserData, IdentityKeys,
    InboundUser, MutationResponse, RemoveKeys, RemoveUserItem, RemoveUserRequest,
    RemoveUsersRequest,
};
