//! ONVIF adapter.
//!
//! SOAP 1.2 over HTTP with WS-Security digest authentication. Device and
//! service discovery happen on connect; events are emulated by polling a
//! pull-point subscription.

pub mod device;
pub mod driver;
pub mod events;
pub mod media;
pub mod ptz;
pub mod soap;
pub mod transport;
pub mod xml;

pub use driver::{OnvifDriver, PROTOCOL_ID};
pub use events::PollSettings;
pub use transport::{HttpSoapTransport, SoapTransport, TransportFactory, http_transport_factory};
