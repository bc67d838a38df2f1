// Every route below is protected by `middleware::require_auth`; handlers
// receive the admitted `Principal` through request extensions.
pub mod health;
pub mod records;
pub mod whoami;
