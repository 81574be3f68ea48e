//! Delivery side of the collection pipeline: remote calls, destinations,
//! fan-out dispatch and the [`Collector`] that ties them to
//! `beacon-events`.

pub mod analytics;
pub mod collector;
pub mod destination;
pub mod dispatcher;
pub mod remote;

pub use analytics::ServerAnalytics;
pub use collector::{CollectError, Collector};
pub use destination::{
    Destination, DestinationError, DestinationFactory, DestinationRegistry, DestinationSpec, Env,
    FactoryContext, ProcessEnv, self_configured,
};
pub use dispatcher::{DispatchFailure, DispatchReport, Dispatcher, ErrorHandler};
pub use remote::{RemoteError, RemoteRequest, ResponseBody, remote_call};
