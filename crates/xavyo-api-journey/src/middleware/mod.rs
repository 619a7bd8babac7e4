pub mod sso_cookie;
