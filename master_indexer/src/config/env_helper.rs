use std::str::FromStr;

use anyhow::{Context, Result};

/// Load an environment variable and parse it to the given type
///
/// # Errors
///
/// Returns an error if the environment variable is not set or is not a valid value for the given type
pub fn load_env_var<T: FromStr>(var_name: &str) -> Result<T> {
    let var = std::env::var(var_name).context(format!("{} is not set", var_name))?;
    var.parse::<T>()
        .map_err(|_| anyhow::anyhow!("{} is not a valid {}", var_name, var))
}

/// Load an environment variable, falling back to a default when unset
///
/// Set-but-unparsable values are still an error, so a typo in the
/// environment does not silently select the default.
pub fn load_env_var_or<T: FromStr>(var_name: &str, default: T) -> Result<T> {
    match std::env::var(var_name) {
        Ok(var) => var
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{} is not a valid {}", var_name, var)),
        Err(_) => Ok(default),
    }
}
