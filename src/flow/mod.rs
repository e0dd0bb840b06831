//! Data flow routing
//!
//! The control plane hands every data request to the [`DataFlowManager`], which
//! picks the first registered [`DataFlowController`] able to serve it.

pub mod controller;
pub mod manager;
pub mod request;
pub mod status;

pub use controller::DataFlowController;
pub use manager::DataFlowManager;
pub use request::DataRequest;
pub use status::{ResponseStatus, StatusFailure, StatusResult};
