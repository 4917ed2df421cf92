use std::env::VarError;

use crate::error::{Error, Result};

pub const ENV_VAR_ACCESS_KEY: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_VAR_SECRET_KEY: &str = "AWS_SECRET_ACCESS_KEY";

pub fn var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|err| {
        if let VarError::NotPresent = err {
            Error::MissingEnvVar(name.to_string())
        } else {
            Error::other(err)
        }
    })
}

/// The SDK sources the credentials itself; this only front-loads the
/// missing-variable diagnostic before the first remote call.
pub fn check_credentials() -> Result<()> {
    var(ENV_VAR_ACCESS_KEY)?;
    var(ENV_VAR_SECRET_KEY)?;
    Ok(())
}
