//! Routing of proxied FHIR requests across the launch server and
//! configured secondary sources

pub mod router;
pub mod secondary;
pub mod source;
pub mod transport;

pub use router::{
    skip_source, stops_fallback, FhirRouter, IdentityResult, InboundRequest, LaunchContext,
    PrimarySource, RouteOutcome, SkipReason,
};
pub use secondary::SecondaryFhirStrategy;
pub use source::{SourceDescriptor, SourceStrategy};
pub use transport::{
    proxy_headers, OutboundRequest, ReqwestTransport, Transport, TransportError, UpstreamResponse,
    PROXY_HEADERS,
};
