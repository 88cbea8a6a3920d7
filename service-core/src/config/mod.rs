use crate::error::AppError;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::de::DeserializeOwned;

/// Starts a layered configuration: an optional `file_name` file (any format
/// the `config` crate recognises), then `PREFIX_` environment variables with
/// `__` as the nesting separator. Callers register their own defaults on the
/// returned builder; defaults always rank below both sources.
///
/// Keys named in `list_keys` are split on `,` when read from the environment.
pub fn layered(file_name: &str, env_prefix: &str, list_keys: &[&str]) -> ConfigBuilder<DefaultState> {
    dotenvy::dotenv().ok();

    let mut env = Environment::with_prefix(env_prefix)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true);
    if !list_keys.is_empty() {
        env = env.list_separator(",");
        for key in list_keys {
            env = env.with_list_parse_key(key);
        }
    }

    Config::builder()
        .add_source(File::with_name(file_name).required(false))
        .add_source(env)
}

/// Builds the layered configuration and deserializes it into `T`.
pub fn load<T: DeserializeOwned>(builder: ConfigBuilder<DefaultState>) -> Result<T, AppError> {
    let config = builder.build()?;
    Ok(config.try_deserialize()?)
}
