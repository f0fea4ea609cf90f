//! Waymock: declarative HTTP mocking for tests.
//!
//! Test code declares expected HTTP calls as handlers; intercepted traffic
//! is matched against those declarations and answered with the declared
//! responses. Matching runs either fully in-process ([`Interceptor`]) or
//! across a process boundary through a relay server ([`relay::RelayServer`])
//! that multiple test workers share over a control channel
//! ([`interceptor::RemoteInterceptor`]).

// ===== Core matching engine =====
pub mod handler;
pub mod http;
pub mod registry;
pub mod restriction;
pub mod url;

// ===== Facades and remote mode =====
pub mod config;
pub mod interceptor;
pub mod relay;
pub mod transport;

pub use config::{RelayConfig, UnhandledRequestPolicy};
pub use handler::{Handler, HandlerError, InterceptedExchange};
pub use http::{
    HttpHeaders, HttpRequest, HttpResponse, Method, ResponseDeclaration, SearchParams,
};
pub use interceptor::{InterceptError, Interceptor, RemoteError, RemoteInterceptor};
pub use relay::RelayServer;
pub use restriction::{MatchError, Restriction, StaticRestriction};
