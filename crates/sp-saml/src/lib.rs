//! # sp-saml
//!
//! A SAML 2.0 Service Provider library. A web application embeds it to
//! authenticate users against remote Identity Providers:
//!
//! - **AuthnRequest / Response** - single sign-on over HTTP-Redirect,
//!   HTTP-POST, and HTTP-Artifact
//! - **LogoutRequest / LogoutResponse** - single logout over
//!   HTTP-Redirect, HTTP-POST, and SOAP
//! - **XML signature** - enveloped XML-DSig signing and verification,
//!   plus detached query-string signatures for the redirect binding
//! - **Artifact resolution** - SourceID lookup and SOAP dereferencing
//! - **Validation** - issuer, status, time window, audience, circle of
//!   trust, and InResponseTo correlation
//!
//! # Architecture
//!
//! - [`metadata`] - the immutable configuration snapshot (SP and IdP
//!   descriptors, circles of trust, extended config, credentials)
//! - [`builder`] / [`parser`] - outbound construction and inbound typed
//!   accessors
//! - [`signature`] - XML-DSig and redirect signing/verification
//! - [`bindings`] - POST, Redirect, and SOAP transport encodings
//! - [`artifact`] - artifact parsing and back-channel resolution
//! - [`correlation`] - the in-flight request ID cache
//! - [`validator`] - the response validation pipeline
//! - [`controller`] - the entry points the host calls, over the [`host`]
//!   contract
//!
//! # SAML Specifications
//!
//! - [SAML 2.0 Core](https://docs.oasis-open.org/security/saml/v2.0/saml-core-2.0-os.pdf)
//! - [SAML 2.0 Bindings](https://docs.oasis-open.org/security/saml/v2.0/saml-bindings-2.0-os.pdf)
//! - [XML Signature](https://www.w3.org/TR/xmldsig-core1/)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod artifact;
pub mod bindings;
pub mod builder;
pub mod codec;
pub mod controller;
pub mod correlation;
pub mod error;
pub mod host;
pub mod metadata;
pub mod parser;
pub mod signature;
pub mod types;
pub mod validator;
mod xml;

pub use builder::AuthnRequestParams;
pub use controller::{LogoutOutcome, LogoutParams, SpController};
pub use correlation::RequestCorrelationCache;
pub use error::{SpError, SpResult};
pub use host::{HostRequest, HostResponse};
pub use metadata::{KeyStore, MetadataStore};
pub use types::{NameId, SamlBinding};
pub use validator::ValidatedAuthnResponse;
