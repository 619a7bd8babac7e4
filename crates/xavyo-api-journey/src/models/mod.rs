//! Request and response types for the gateway endpoints

pub mod discovery;
pub mod requests;
pub mod responses;

pub use discovery::{Jwk, JwkSet, OpenIdConfiguration};
pub use requests::{AuthorizeQuery, SamlLoginQuery, SelectQuery};
pub use responses::{
    generate_auto_submit_form, HealthResponse, SelectionOption, SelectionResponse,
};
